//! Event Router: one inbound frame in, zero or more sends out.

use std::sync::Arc;

use ::metrics::{counter, gauge};
use plexus_core::events::EventKind;
use plexus_core::{AnnounceRequest, ClientEvent, ConfigureRequest, Envelope, PeerId, ProtocolError};
use tracing::{debug, info, instrument, warn};

use super::registry::PeerLink;
use super::{Broker, BrokerState, Delivery};
use crate::metrics as names;

/// What the router did with a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routed {
    /// `module:authenticated` sent back to the sender.
    Acknowledged,
    /// An `error` event sent back to the sender.
    Rejected(ProtocolError),
    /// Sender now occupies its announced slot. Nothing is sent.
    Announced {
        /// Peer that previously held the slot, if one was superseded.
        superseded: Option<PeerId>,
    },
    /// `module:configure` handed to one addressed peer.
    Delivered {
        /// Recipient.
        to: PeerId,
    },
    /// Opaque event fanned out to every other peer.
    Broadcast {
        /// Peers a send was attempted to.
        recipients: usize,
        /// Peers evicted because their send failed.
        failed: usize,
    },
    /// The sender is no longer registered; frame discarded.
    Ignored,
}

impl Broker {
    /// Route one inbound text frame from `from`.
    ///
    /// Never fails: every problem is either reported to the sender as an
    /// `error` event or handled by evicting a dead recipient.
    #[instrument(skip_all, fields(peer_id = %from))]
    pub fn handle_frame(&self, from: &PeerId, frame: &str) -> Routed {
        let sender = {
            let state = self.state.lock();
            state
                .registry
                .get(from)
                .map(|p| (Arc::clone(&p.link), p.authenticated))
        };
        let Some((link, authenticated)) = sender else {
            debug!("frame from unregistered peer");
            return Routed::Ignored;
        };

        let envelope = match Envelope::parse(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                counter!(names::BROKER_EVENTS_TOTAL, "kind" => "malformed").increment(1);
                return self.reject(&link, err);
            }
        };

        let kind = EventKind::of(&envelope.event_type);
        counter!(names::BROKER_EVENTS_TOTAL, "kind" => kind.as_str()).increment(1);

        // Authorization is checked before field validation.
        if kind == EventKind::Announce && !authenticated {
            return self.reject(&link, ProtocolError::MustAuthenticateBeforeAnnouncing);
        }

        match ClientEvent::decode(envelope) {
            Err(err) => self.reject(&link, err),
            Ok(ClientEvent::Authenticate { token }) => self.authenticate(&link, token.as_deref()),
            Ok(ClientEvent::Announce(req)) => self.announce(&link, req),
            Ok(ClientEvent::Configure(req)) => self.configure(&link, req),
            Ok(ClientEvent::Opaque(envelope)) => {
                if authenticated {
                    self.broadcast(&link, &envelope.event_type, frame)
                } else {
                    self.reject(&link, ProtocolError::NotAuthenticated)
                }
            }
        }
    }

    fn reject(&self, link: &PeerLink, err: ProtocolError) -> Routed {
        counter!(names::BROKER_REJECTIONS_TOTAL, "code" => err.code()).increment(1);
        if err.is_malformed() {
            warn!(code = err.code(), error = %err, "malformed frame");
        } else {
            debug!(code = err.code(), error = %err, "event rejected");
        }
        self.reply_to(link, &Envelope::from_protocol_error(&err));
        Routed::Rejected(err)
    }

    fn authenticate(&self, link: &PeerLink, token: Option<&str>) -> Routed {
        let accepted = match self.config.shared_secret.as_deref() {
            None => true,
            Some(secret) => token == Some(secret),
        };
        if !accepted {
            counter!(names::BROKER_AUTH_FAILURES_TOTAL).increment(1);
            warn!(peer_id = %link.id(), "authentication failed");
            return self.reject(link, ProtocolError::InvalidToken);
        }

        {
            let mut state = self.state.lock();
            match state.registry.get_mut(link.id()) {
                Some(peer) => peer.authenticated = true,
                None => return Routed::Ignored,
            }
        }
        info!(peer_id = %link.id(), "peer authenticated");
        self.reply_to(link, &Envelope::authenticated());
        Routed::Acknowledged
    }

    fn announce(&self, link: &PeerLink, req: AnnounceRequest) -> Routed {
        let (superseded, slots) = {
            let mut state = self.state.lock();
            let BrokerState {
                registry,
                directory,
            } = &mut *state;
            let Some(peer) = registry.get_mut(link.id()) else {
                return Routed::Ignored;
            };
            let _ = directory.unregister(link.id());
            peer.name.clone_from(&req.name);
            peer.index = req.index;
            let superseded = directory.register(link.id(), &req.name, req.index);
            (superseded, directory.slot_count())
        };
        gauge!(names::BROKER_MODULES_REGISTERED).set(slots as f64);

        if let Some(previous) = &superseded {
            warn!(
                module = %req.name,
                index = ?req.index,
                peer_id = %link.id(),
                previous_peer_id = %previous,
                "module slot superseded"
            );
        }
        info!(peer_id = %link.id(), module = %req.name, index = ?req.index, "module announced");
        Routed::Announced { superseded }
    }

    fn configure(&self, link: &PeerLink, req: ConfigureRequest) -> Routed {
        let target = {
            let state = self.state.lock();
            state
                .directory
                .lookup(&req.module_name, req.module_index)
                .and_then(|id| state.registry.get(id))
                .map(|p| Arc::clone(&p.link))
        };
        let Some(target) = target else {
            debug!(module = %req.module_name, index = ?req.module_index, "configure target not found");
            return self.reject(link, ProtocolError::ModuleNotFound);
        };

        let envelope = Envelope::configure(req.config, req.source);
        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize module:configure");
                return Routed::Ignored;
            }
        };
        if self.deliver(&target, json.into()) == Delivery::Dead {
            self.evict(target.id());
        }
        debug!(
            module = %req.module_name,
            index = ?req.module_index,
            to = %target.id(),
            "configure delivered"
        );
        Routed::Delivered {
            to: target.id().clone(),
        }
    }

    fn broadcast(&self, link: &PeerLink, event_type: &str, frame: &str) -> Routed {
        let recipients: Vec<Arc<PeerLink>> = {
            let state = self.state.lock();
            state
                .registry
                .all()
                .filter(|p| p.id() != link.id())
                .map(|p| Arc::clone(&p.link))
                .collect()
        };

        let payload: Arc<str> = Arc::from(frame);
        let mut dead = Vec::new();
        for recipient in &recipients {
            if self.deliver(recipient, Arc::clone(&payload)) == Delivery::Dead {
                dead.push(recipient.id().clone());
            }
        }
        for id in &dead {
            self.evict(id);
        }

        debug!(event_type, recipients = recipients.len(), failed = dead.len(), "broadcast");
        Routed::Broadcast {
            recipients: recipients.len(),
            failed: dead.len(),
        }
    }
}
