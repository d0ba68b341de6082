// Entity Models - the organization registry snapshot
//
// Client → Division → Site, in declared order.
// Owned by the caller; every pipeline stage borrows it read-only.

pub mod organization;

pub use organization::{
    last4, Client, Division, MatchResult, OrganizationRegistry, Site, SiteRef,
};
