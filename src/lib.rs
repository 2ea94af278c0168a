//! A UPnP 1.0 discovery and description node
//!
//! The upnp-node crate implements the discovery and description parts of
//! UPnP 1.0: SSDP (the Simple Service Discovery Protocol) over IPv4
//! multicast, plus the tiny HTTP responder that UPnP requires so that the
//! LOCATION URL in every announcement actually resolves to a device
//! description document.
//!
//! A single running [`Node`] can play either or both of two symmetric
//! roles:
//!
//!  - a *publisher*, announcing devices with NOTIFY `ssdp:alive`
//!    messages, answering M-SEARCH queries (spread over the MX window as
//!    the protocol requires), re-announcing periodically, and saying
//!    `ssdp:byebye` when a device is withdrawn or the node shuts down;
//!  - a *scanner*, issuing M-SEARCH queries and routing matching
//!    replies and notifications to registered [`ScanCallback`]s.
//!
//! Devices are described by [`SsdpMessage`]s; the bytes behind a
//! device's LOCATION URL come from a [`LocationDescriptor`], which may be
//! constant content, a file, or a remote URL (see
//! [`published_location`] for the selector).
//!
//! There is no Internet RFC for SSDP -- merely some expired drafts. The
//! protocol is documented in the [UPnP Device
//! Architecture](https://openconnectivity.org/developer/specifications/upnp-resources/upnp/archive-of-previously-published-upnp-device-architectures/)
//! documents; this crate follows version 1.0 and is restricted to IPv4.
//!
//! ```no_run
//! use upnp_node::{Node, SsdpMessage, published_location};
//!
//! # async fn example() -> Result<(), upnp_node::Error> {
//! let node = Node::new().set_ttl(300).set_http_port(49999);
//! node.start().await?;
//! node.publish([SsdpMessage::new(
//!     "e53a3f9c-ba31-47f2-8ee4-26e520d30f38",
//!     Node::default_device_urn("example", 1),
//!     published_location("description.xml", "<?xml version=\"1.0\"?>\n<root/>"),
//! )])
//! .await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod cache;
mod error;
mod http;
mod location;
mod message;
mod netif;
mod node;
mod scanner;
mod scheduler;
mod transport;

pub use error::Error;
pub use location::{
    published_location, resource_location, ConstantLocation, FileLocation,
    LocationDescriptor, UrlLocation,
};
pub use message::SsdpMessage;
pub use netif::InterfaceInfo;
pub use node::Node;
pub use scanner::{ScanCallback, Scanner};
