//! Network layer for the lockbridge gateway.
//!
//! This crate owns everything between the gateway and the broker:
//!
//! - **[`BrokerClient`]**: the publish/subscribe contract the bridge codes
//!   against, with the rumqttc-backed [`mqtt::MqttBroker`] and the recording
//!   [`mock::MockBroker`].
//! - **[`mqtt::MqttSession`]**: the event loop half of a session, which
//!   reconnects on its own and restores subscriptions after every ConnAck.
//! - **[`supervisor::ReconnectSupervisor`]**: the state machine that keeps
//!   the physical transport under the session alive.
//!
//! # Example
//!
//! ```no_run
//! use lockbridge_network::mqtt::{self, MqttConfig, SessionEvent};
//! use tokio::sync::mpsc;
//!
//! # async fn example() {
//! let (broker, session) = mqtt::connect(MqttConfig::new("broker.local", 1883));
//! let (tx, mut rx) = mpsc::channel(32);
//! tokio::spawn(session.run(tx));
//!
//! while let Some(event) = rx.recv().await {
//!     if let SessionEvent::Message(message) = event {
//!         println!("{}: {}", message.topic, message.payload_str());
//!     }
//! }
//! # drop(broker);
//! # }
//! ```

pub mod broker;
pub mod error;
pub mod mock;
pub mod mqtt;
pub mod supervisor;

pub use broker::{BrokerClient, DEFAULT_QOS, InboundMessage, Qos};
pub use error::{NetworkError, Result};
pub use supervisor::{ReconnectSupervisor, SupervisorAction, SupervisorConfig, TransportState};
