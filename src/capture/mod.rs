pub mod browser;
pub mod chromium;
pub mod orchestrator;
pub mod scheduler;
pub mod throttle;

pub use browser::{capture, CaptureTarget, MatchRule, NetworkEvent, RenderEngine, RenderSession};
pub use chromium::ChromiumEngine;
pub use orchestrator::CaptureOrchestrator;
pub use scheduler::CaptureScheduler;
pub use throttle::{ThrottleDecision, ThrottleGuard};
