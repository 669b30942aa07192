pub mod audio;
pub mod handle;
pub mod input;
pub mod session;
pub mod transport;

pub use audio::{RodioSink, SilentSink};
pub use handle::AsyncHandle;
pub use input::get_input_text;
pub use session::Session;
pub use transport::{ChunkStream, HttpTransport, TalkTransport};
