use datajpa_core::{
    CrudRepository, Direction, Managed, Member, MemberRepository, PageRequest, RepoError, Session,
    Sort, SqliteMemberRepository, ValidationError,
};

fn seed_five_aged_ten(repo: &SqliteMemberRepository<'_>) {
    for index in 1..=5 {
        repo.save(Member::new(format!("member{index}"), 10)).unwrap();
    }
}

fn usernames(members: &[Managed<Member>]) -> Vec<String> {
    members
        .iter()
        .map(|member| member.borrow().username.clone())
        .collect()
}

fn by_username_desc(page_index: i64, page_size: i64) -> PageRequest {
    PageRequest::of_sorted(
        page_index,
        page_size,
        Sort::by("username", Direction::Desc),
    )
    .unwrap()
}

#[test]
fn first_page_reports_content_and_totals() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let page = repo.find_by_age(10, &by_username_desc(0, 3)).unwrap();

    assert_eq!(
        usernames(page.content()),
        vec!["member5", "member4", "member3"]
    );
    assert_eq!(page.number_of_elements(), 3);
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.number(), 0);
    assert_eq!(page.total_pages(), 2);
    assert!(page.is_first());
    assert!(page.has_next());
    assert!(!page.is_last());
}

#[test]
fn last_partial_page_derives_total_from_content() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let page = repo.find_by_age(10, &by_username_desc(1, 3)).unwrap();

    assert_eq!(usernames(page.content()), vec!["member2", "member1"]);
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.total_pages(), 2);
    assert!(!page.is_first());
    assert!(page.has_previous());
    assert!(!page.has_next());
    assert!(page.is_last());
}

#[test]
fn page_beyond_last_is_empty_but_keeps_totals() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let page = repo.find_by_age(10, &by_username_desc(4, 3)).unwrap();

    assert!(page.content().is_empty());
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.total_pages(), 2);
    assert!(!page.has_next());
}

#[test]
fn next_request_walks_every_row_once() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let mut request = by_username_desc(0, 2);
    let mut seen = Vec::new();
    loop {
        let page = repo.find_by_age(10, &request).unwrap();
        seen.extend(usernames(page.content()));
        if !page.has_next() {
            break;
        }
        request = request.next();
    }

    assert_eq!(
        seen,
        vec!["member5", "member4", "member3", "member2", "member1"]
    );
}

#[test]
fn empty_filter_yields_empty_first_page() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let page = repo.find_by_age(99, &by_username_desc(0, 3)).unwrap();

    assert!(page.content().is_empty());
    assert_eq!(page.total_elements(), 0);
    assert_eq!(page.total_pages(), 0);
    assert!(page.is_first());
    assert!(page.is_last());
}

#[test]
fn paged_rows_share_instances_with_the_session() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let page = repo.find_all_paged(&by_username_desc(0, 5)).unwrap();
    let member5 = repo.find_by_username("member5").unwrap();

    assert!(Managed::same_instance(&page.content()[0], &member5[0]));
}

#[test]
fn map_converts_content_and_keeps_metadata() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let page = repo
        .find_by_age(10, &by_username_desc(0, 3))
        .unwrap()
        .map(|member| member.borrow().username.to_uppercase());

    assert_eq!(page.content(), ["MEMBER5", "MEMBER4", "MEMBER3"]);
    assert_eq!(page.total_elements(), 5);
    assert!(page.has_next());
}

#[test]
fn invalid_requests_are_rejected_before_querying() {
    assert!(matches!(
        PageRequest::of(-1, 3),
        Err(ValidationError::InvalidPageRequest(_))
    ));
    assert!(matches!(
        PageRequest::of(0, 0),
        Err(ValidationError::InvalidPageRequest(_))
    ));
}

#[test]
fn oversized_page_size_is_capped_not_rejected() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let page = repo.find_by_age(10, &by_username_desc(0, 2001)).unwrap();

    assert_eq!(page.size(), 2000);
    assert_eq!(page.number_of_elements(), 5);
    assert_eq!(page.total_pages(), 1);
}

#[test]
fn huge_page_index_returns_empty_content() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let page = repo
        .find_by_age(10, &by_username_desc(i64::from(u32::MAX) + 1, 3))
        .unwrap();

    assert!(page.content().is_empty());
    assert_eq!(page.total_elements(), 5);
    assert!(!page.has_next());
}

#[test]
fn unknown_sort_field_is_a_validation_failure() {
    let session = Session::open_in_memory().unwrap();
    let repo = SqliteMemberRepository::try_new(&session).unwrap();
    seed_five_aged_ten(&repo);

    let request = PageRequest::of_sorted(0, 3, Sort::by("nickname", Direction::Asc)).unwrap();
    let err = repo.find_by_age(10, &request).unwrap_err();

    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::UnknownField { .. })
    ));
}
