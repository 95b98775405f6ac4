//! Built-in plugins that drive the DeepSeek web chat over CDP.

pub mod answer;
pub mod catalog;
pub mod chat;
pub mod diagnostics;
pub mod exporters;
pub mod extractors;
pub mod maintenance;
pub mod page;
pub mod scripts;

pub use answer::{AnswerWatcher, Detection, Verdict};
pub use chat::{ChatInjector, NewChatOpener};
pub use diagnostics::{LlmPing, Snapshot};
pub use exporters::DeepSeekDomExport;
pub use extractors::{HistoryRecord, TotalLinks};
pub use maintenance::ClearHistory;
