//! Text generation provider access: request shapes, model fallback and
//! recovery of structured output.

pub mod classifier;
pub mod dispatcher;
pub mod messages;
pub mod recovery;
pub mod shapes;
pub mod transport;

pub use classifier::{default_model_error_classifier, ModelErrorClassifier};
pub use dispatcher::ModelDispatcher;
pub use messages::{ChatMessage, ContentPart, MessageContent, ModelRequest, ModelResponse, Role};
pub use recovery::{
    dispatch_structured, dispatch_structured_with_limit, parse_structured, StructuredResponse,
};
pub use shapes::{extract_content, RequestShape};
pub use transport::{HttpTransport, ModelTransport, TransportResponse};
