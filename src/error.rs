use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExplorerError>;

/// Failures surfaced by the explorer services.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// Network or provider error on a taxon search or observation fetch.
    #[error("fetch failed: {0}")]
    FetchFailed(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("fetch failed: provider returned HTTP {status} for {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    /// The provider payload did not have the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The search succeeded but returned zero candidates.
    #[error("no species found matching \"{name}\"")]
    NoMatch { name: String },

    /// The classifier could not be initialized. Permanent for the process.
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    /// Classification attempted outside an interactive client context.
    #[error("classification is not supported in this execution context")]
    UnsupportedContext,

    /// The file handed to the classifier is not an image.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A caller violated a query precondition (non-positive id or day count).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// What the user was doing when an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    FetchObservations,
    SearchTaxa,
    Classify,
}

impl Operation {
    fn failure_message(self) -> &'static str {
        match self {
            Operation::FetchObservations => "Failed to fetch observations. Please try again.",
            Operation::SearchTaxa => "Failed to search for this species. Please try again.",
            Operation::Classify => "Error classifying the image. Please try again.",
        }
    }
}

impl ExplorerError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Message shown on the user-facing surface for a failure of `operation`.
    pub fn user_message(&self, operation: Operation) -> String {
        match self {
            Self::NoMatch { name } => format!("No species found matching \"{name}\""),
            Self::ModelLoadFailed(_) => "Unable to load the image classification model. \
                 Check your internet connection or try again later."
                .to_string(),
            Self::UnsupportedContext => "Cannot run classification on the server".to_string(),
            Self::InvalidInput(_) => "Please upload an image file.".to_string(),
            Self::InvalidQuery(reason) => format!("Invalid query: {reason}"),
            _ => operation.failure_message().to_string(),
        }
    }
}
