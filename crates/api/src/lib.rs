pub mod client;
pub mod error;
pub mod inspect;
pub mod stream;
pub mod types;

pub use client::CoderClient;
pub use error::{ApiError, ApiResult};
pub use inspect::{
    AppInfo, BodyInfo, CommandArgument, CommandDetail, CommandInfo, CustomFieldInfo,
    EndpointsInfo, FieldInfo, InspectClient, MethodInfo, ModelInfo, PropertyInfo,
    RouterRegistration, SerializerInfo, TaskArgs, TaskInfo, UrlPattern, ViewSetAction,
    ViewSetInfo, ViewSetMethod, ViewsInfo,
};
pub use stream::{
    CompletionPayload, ErrorPayload, SendEventStream, SendStreamHandle, SendWorker, StreamEvent,
};
pub use types::{ChatMessage, ChatRole, ChatSession};
