// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Remote collaborator clients.

pub mod trust_authority;

pub use trust_authority::{
    AuthorityError, ChallengePhoto, StatusReport, TrustAuthority, TrustAuthorityClient,
};
