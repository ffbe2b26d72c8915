use std::fmt;
use thiserror::Error;

/// Why a member may not vote right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligibility {
    NotActive,
    DeadlinePassed,
    AlreadyVoted,
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligibility::NotActive => write!(f, "poll not active"),
            Ineligibility::DeadlinePassed => write!(f, "deadline passed"),
            Ineligibility::AlreadyVoted => write!(f, "already voted"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    // Validation, rejected before any write
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("individual ballots of a secret poll are not shown")]
    SecretBallot,

    // Eligibility and authorization
    #[error("cannot vote: {0}")]
    NotEligible(Ineligibility),

    #[error("poll not found")]
    PollNotFound,

    #[error("question not found: {0}")]
    SubPollNotFound(String),

    #[error("you are not allowed to do that")]
    Forbidden,

    // Backend
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl PollError {
    /// Backend failures are reported generically; everything else carries its own reason.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            PollError::Database(_) | PollError::Discord(_) | PollError::CorruptRow(_)
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            PollError::NotEligible(reason) => format!("You cannot vote: {}.", reason),
            e if e.is_backend() => "Something went wrong talking to the backend. Please try again.".to_string(),
            e => {
                let mut msg = e.to_string();
                if let Some(first) = msg.get(0..1) {
                    let upper = first.to_uppercase();
                    msg.replace_range(0..1, &upper);
                }
                msg
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PollError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_reasons_read_as_sentences() {
        assert_eq!(Ineligibility::AlreadyVoted.to_string(), "already voted");
        assert_eq!(
            PollError::NotEligible(Ineligibility::DeadlinePassed).user_message(),
            "You cannot vote: deadline passed."
        );
    }

    #[test]
    fn backend_errors_are_reported_generically() {
        let err = PollError::Database(sqlx::Error::RowNotFound);
        assert!(err.is_backend());
        assert!(!err.user_message().contains("RowNotFound"));
        assert!(!PollError::Forbidden.is_backend());
        assert_eq!(PollError::PollNotFound.user_message(), "Poll not found");
    }
}
