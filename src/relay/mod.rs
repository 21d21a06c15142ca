//! Upload relay: stage an incoming recording, forward it to the processing
//! service as multipart, translate the response, release the staged copy.

mod downstream;
mod error;
mod result;
mod service;
mod staging;

pub use downstream::{Downstream, DownstreamReply, ForwardError, HttpDownstream};
pub use error::RelayError;
pub use result::{RelayFailure, RelayResult, DOWNSTREAM_FAILURE_MESSAGE};
pub use service::RelayService;
pub use staging::{
    staged_name, MemoryStore, StagedPayload, StagedUpload, StagingArea, StagingError,
    StagingMode, StagingWriter,
};
