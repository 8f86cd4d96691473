//! Business logic services for storefront.
//!
//! # Services
//!
//! - `catalog` - Published products, articles and lookbooks (moka cached)
//! - `checkout` - Cart validation, stock hold and hosted payment session
//! - `contact` - Contact and return-request forms
//! - `inventory` - Stock ledger reservations
//! - `journal` - JSON-lines checkout and order logs
//! - `mailer` - Outgoing email (SMTP or in-memory)
//! - `newsletter` - Subscribers, unsubscribe links and batched sends
//! - `orders` - Payment webhook processing

pub mod catalog;
pub mod checkout;
pub mod contact;
pub mod inventory;
pub mod journal;
pub mod mailer;
pub mod newsletter;
pub mod orders;
