//! Core value types for the race model.
//!
//! - [`Tod`] is the single time representation: passings, start and finish
//!   instants, elapsed and bunch times, bonuses and thresholds
//! - [`Bib`] is a rider number with numeric-aware ordering
//! - [`RiderStatus`] carries the dns/dnf/wd/dsq/otl result codes
//! - [`Rider`] is the fixed-schema row and [`RiderTable`] the ordered,
//!   bib-indexed collection the recalculator sorts in place
//!
//! ```rust
//! use roadrace::types::{Rider, RiderTable, Tod};
//!
//! let mut table = RiderTable::new();
//! table.insert(Rider::new("12").with_category("A")).unwrap();
//! let rider = table.get_mut("12").unwrap();
//! rider.finish = Some("10:01:02.5".parse::<Tod>().unwrap());
//! assert_eq!(table.get("12").unwrap().finish, Some(Tod::from_millis(36_062_500)));
//! ```

mod bib;
mod rider;
mod status;
mod tod;

pub use bib::Bib;
pub use rider::{Rider, RiderTable};
pub use status::RiderStatus;
pub use tod::Tod;
