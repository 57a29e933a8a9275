//! Structured SIP values: methods, versions, status codes, header names,
//! URIs, addresses, Via, CSeq and the [`Fields`] multi-map.

pub mod address;
pub mod cseq;
pub mod fields;
pub mod header_name;
pub mod method;
pub mod param;
pub mod parameterable;
pub mod status;
pub mod uri;
pub mod version;
pub mod via;

pub use address::Address;
pub use cseq::CSeq;
pub use fields::{Fields, HeaderValue};
pub use header_name::{HeaderKind, HeaderName};
pub use method::Method;
pub use param::Parameters;
pub use parameterable::Parameterable;
pub use status::{reason_phrase, StatusCode};
pub use uri::{SipUri, Uri};
pub use version::Version;
pub use via::Via;
