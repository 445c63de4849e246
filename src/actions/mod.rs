pub mod check;
pub mod get;
pub mod helpers;
pub mod put;

pub use check::check_action;
pub use get::get_action;
pub use put::put_action;

/// What a finished action handler reports back to the worker.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Status name (UP, DOWN, MUMBLE, CORRUPT, CHECK_FAILED, SKIPPED).
    pub status: String,
    pub public_message: String,
    pub private_message: String,
    /// Flag planted by a successful PUT.
    pub flag: Option<String>,
}

impl ActionOutcome {
    pub fn new(status: impl Into<String>, public: impl Into<String>, private: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            public_message: public.into(),
            private_message: private.into(),
            flag: None,
        }
    }
}
