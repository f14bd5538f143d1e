//! Store actor, its client-facing façades, and the event stream (spec.md
//! §4.3/§4.4/§4.5 — components C4 through C7).

pub mod actor;
pub mod events;
pub mod flare;
pub mod frontend;
pub mod proxy;
pub mod registry;

pub use actor::{Role, StoreActorHandle, StoreRequest};
pub use events::EventPublisher;
pub use flare::Flare;
pub use frontend::Frontend;
pub use proxy::{Proxy, ProxyResponse};
pub use registry::StoreRegistry;
