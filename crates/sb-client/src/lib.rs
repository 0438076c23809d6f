// sb-client: the consumer side of the switchboard RPC framework.
//
// A consumer resolves providers through the registry, keeps one cached
// session per provider address, correlates responses by request id, and
// presents a typed call surface that converts every routine failure into
// a friendly, type-appropriate value.  A condition-driven resolver can
// divert calls to local or fallback implementations.

pub mod condition;
pub mod consumer;
pub mod facade;
pub mod friendly;
pub mod local;

pub use condition::ConditionEvaluator;
pub use consumer::{ConsumerClient, ResponseHandle};
pub use facade::{CallConfig, CallHandle, ProxyBuilder, ServiceProxy};
pub use friendly::FriendlyReturn;
pub use local::LocalServiceRegistry;
