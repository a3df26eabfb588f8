/*!
# OrcaDash DevKit - Test support for the controller console

Lets the core be exercised end to end without a real controller:
- `MockController`: a framed TCP peer that records and pushes messages
- `ProtocolMessageBuilder` / `ReplayScript`: well-formed wire payloads and replay files
- `TestHarness`: coordinator + store with queue pumping and polling helpers
*/

pub mod harness;
pub mod message_builders;
pub mod mock_controller;

pub use harness::{init_logging, TestHarness};
pub use message_builders::{ProtocolMessageBuilder, ReplayScript};
pub use mock_controller::MockController;
