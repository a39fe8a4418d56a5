//! # plexus-core
//!
//! Protocol types shared by the broker and its tests.
//!
//! - [`envelope`]: the `{ type, data, source }` frame every peer speaks
//! - [`events`]: typed decoding of the control events the router interprets
//! - [`errors`]: client-visible protocol failures and their exact wire text
//! - [`ids`]: transport-assigned peer identifiers

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;

pub use envelope::{Envelope, SERVER_SOURCE};
pub use errors::ProtocolError;
pub use events::{AnnounceRequest, ClientEvent, ConfigureRequest, SlotIndex};
pub use ids::PeerId;
