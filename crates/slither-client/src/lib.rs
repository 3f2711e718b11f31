//! Game client composition: the tick scheduler, input and clock
//! collaborators, status text, and [`GameClient`], which ties the session
//! and the world reconciler to a render sink.

pub mod client;
pub mod input;
pub mod scheduler;
pub mod status;

pub use client::{ClientError, ClientSettings, GameClient, RenderSink, build_session};
pub use input::{MonotonicClock, MovementSource, SteadyClock, StickInput};
pub use scheduler::{DueActions, SchedulerState, TickScheduler};
pub use status::status_text;
