//! Onboarding records: data model, stage graph and transitions.
//!
//! A record moves through its stages only through the pure transition
//! functions in [`transition`]; the resulting [`PartialUpdate`] is the only
//! shape in which a stage change reaches persistence.

pub mod changes;
pub mod model;
pub mod stage;
pub mod transition;

pub use changes::{FieldChange, RecordChanges, diff};
pub use model::{
    Address, AddressDetails, AddressRole, ContactDetails, ContactMedium, ContactMediumType,
    EntityKind, ExternalMirror, OnboardingRecord, PartyType,
};
pub use stage::Stage;
pub use transition::{
    AcceptedStatus, CmOutcome, PARTIAL_UPDATE_ALLOWLIST, PartialUpdate, Transition,
    TransitionError,
};
