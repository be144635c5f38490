//! # Property Graph Model
//!
//! Clean DTOs for the content-addressed property graph.
//! These types cross every boundary: storage ↔ engine ↔ execution ↔ driver.
//!
//! Design rule: this module is pure data — no I/O, no locks, no storage
//! references. Relationships refer to nodes by id, never by pointer.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId};
pub use relationship::{Direction, RelId, Relationship};
pub use value::Value;
pub use property_map::PropertyMap;
