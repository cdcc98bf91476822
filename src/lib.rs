//! Client-side Nostr data access: identifier resolution, merged relay
//! reads, handler-app discovery, live channels and wallet payments.

pub mod augment;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod feeds;
pub mod fetch;
pub mod handlers;
pub mod profile;
pub mod subscription;
pub mod wallet;

pub use client::AppsClient;
pub use config::Config;
pub use error::{Error, Result};
pub use fetch::{AuthoredEvent, Fetcher};
pub use handlers::{AppRegistry, AppSummary};
pub use profile::{Profile, ProfileEvent};
pub use subscription::{BookmarkList, ContactList, DeliveryStream};
pub use wallet::{PaymentReceipt, WalletInfo};

pub use nostr_core::{decode, encode_for_event, scan, StructuredAddress};
