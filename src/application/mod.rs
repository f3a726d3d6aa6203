//! Application services layer: cached dispatch and the helpers built on it.

pub mod dispatch;
pub mod error;
pub mod include;
pub mod menu;

pub use dispatch::{CachedRender, Dispatcher, DispatcherBuilder, RenderOptions, RenderOutcome};
pub use error::{AppError, DispatchError};
pub use include::INCLUDED_PARAM;
pub use menu::{MenuEntry, menu_html};
