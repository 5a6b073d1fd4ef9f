//! Member use-case service.
//!
//! # Responsibility
//! - Provide the lookup, listing and seeding entry points an outer layer
//!   calls.
//! - Delegate persistence to repository implementations.
//!
//! # Invariants
//! - Service APIs never bypass repository contracts.
//! - Listing defaults are applied here, not in the repository.

use crate::entity::{EntityId, Managed};
use crate::error::RepoResult;
use crate::model::member::Member;
use crate::model::member_dto::MemberDto;
use crate::query::descriptor::Direction;
use crate::query::page::{Page, PageRequest, Sort};
use crate::repo::member_repo::MemberRepository;
use log::info;
use std::num::NonZeroU32;

const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(5) {
    Some(size) => size,
    None => NonZeroU32::MIN,
};

/// Use-case service wrapper for member operations.
pub struct MemberService<R: MemberRepository> {
    repo: R,
}

impl<R: MemberRepository> MemberService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Username of the member with `id`.
    ///
    /// # Errors
    /// - `NotFound` when no member has that key.
    pub fn find_username(&self, id: EntityId) -> RepoResult<String> {
        let member = self.repo.get_by_id(id)?;
        let username = member.borrow().username.clone();
        Ok(username)
    }

    /// One page of members.
    pub fn list(&self, request: &PageRequest) -> RepoResult<Page<Managed<Member>>> {
        self.repo.find_all_paged(request)
    }

    /// One page of members mapped to projections.
    pub fn list_dto(&self, request: &PageRequest) -> RepoResult<Page<MemberDto>> {
        self.repo
            .find_all_paged(request)?
            .try_map(|member| MemberDto::from_member(&member.borrow()))
    }

    /// First page, five members, newest usernames first.
    pub fn default_page_request() -> PageRequest {
        PageRequest::first(DEFAULT_PAGE_SIZE).with_sort(Sort::by("username", Direction::Desc))
    }

    /// Saves `count` members named `user{i}` aged `i`.
    pub fn seed(&self, count: u32) -> RepoResult<Vec<Managed<Member>>> {
        let mut members = Vec::with_capacity(usize::try_from(count).unwrap_or_default());
        for index in 0..count {
            let age = i32::try_from(index).unwrap_or(i32::MAX);
            members.push(self.repo.save(Member::new(format!("user{index}"), age))?);
        }
        info!("event=member_seed module=service status=ok count={count}");
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::MemberService;
    use crate::query::descriptor::Direction;
    use crate::repo::member_repo::SqliteMemberRepository;

    #[test]
    fn default_request_sorts_by_username_desc() {
        let request = MemberService::<SqliteMemberRepository<'_>>::default_page_request();
        assert_eq!(request.page_index(), 0);
        assert_eq!(request.page_size(), 5);
        assert_eq!(request.sort().orders()[0].field, "username");
        assert_eq!(request.sort().orders()[0].direction, Direction::Desc);
    }
}
