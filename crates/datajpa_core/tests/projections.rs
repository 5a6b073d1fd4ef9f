use datajpa_core::{
    CrudRepository, Member, MemberDto, MemberRepository, RepoError, Session,
    SqliteMemberRepository, SqliteTeamRepository, Team,
};

#[test]
fn member_dto_joins_team_name() {
    let session = Session::open_in_memory().unwrap();
    let members = SqliteMemberRepository::try_new(&session).unwrap();
    let teams = SqliteTeamRepository::try_new(&session).unwrap();

    let member = members.save(Member::new("AAA", 10)).unwrap();
    let team = teams.save(Team::new("teamA")).unwrap();
    // Pending change; the projection query flushes it first.
    member.borrow_mut().change_team(&team);

    let dtos = members.find_member_dto().unwrap();
    assert_eq!(
        dtos,
        vec![MemberDto {
            id: 1,
            username: "AAA".to_string(),
            team_name: Some("teamA".to_string()),
        }]
    );
}

#[test]
fn member_without_team_projects_absent_team_name() {
    let session = Session::open_in_memory().unwrap();
    let members = SqliteMemberRepository::try_new(&session).unwrap();
    let teams = SqliteTeamRepository::try_new(&session).unwrap();

    let team = teams.save(Team::new("teamA")).unwrap();
    members.save(Member::with_team("AAA", 10, &team)).unwrap();
    members.save(Member::new("BBB", 20)).unwrap();

    let dtos = members.find_member_dto().unwrap();
    assert_eq!(dtos.len(), 2);
    assert_eq!(dtos[0].team_name.as_deref(), Some("teamA"));
    assert_eq!(dtos[1].username, "BBB");
    assert_eq!(dtos[1].team_name, None);
}

#[test]
fn projections_are_not_tracked() {
    let session = Session::open_in_memory().unwrap();
    let members = SqliteMemberRepository::try_new(&session).unwrap();
    members.save(Member::new("AAA", 10)).unwrap();
    session.flush().unwrap();
    session.clear();

    let mut dtos = members.find_member_dto().unwrap();
    dtos[0].username = "changed".to_string();

    assert_eq!(session.cached_count(), 0);
    assert_eq!(session.flush().unwrap(), 0);
    assert_eq!(members.find_username_list().unwrap(), vec!["AAA"]);
}

#[test]
fn username_list_returns_plain_values() {
    let session = Session::open_in_memory().unwrap();
    let members = SqliteMemberRepository::try_new(&session).unwrap();
    members.save(Member::new("AAA", 10)).unwrap();
    members.save(Member::new("BBB", 20)).unwrap();

    assert_eq!(members.find_username_list().unwrap(), vec!["AAA", "BBB"]);
}

#[test]
fn custom_query_maps_full_entities_through_the_cache() {
    let session = Session::open_in_memory().unwrap();
    let members = SqliteMemberRepository::try_new(&session).unwrap();
    let saved = members.save(Member::new("AAA", 10)).unwrap();

    let loaded = members.find_member_custom().unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(datajpa_core::Managed::same_instance(&loaded[0], &saved));
}

#[test]
fn dto_built_from_member_resolves_team() {
    let session = Session::open_in_memory().unwrap();
    let members = SqliteMemberRepository::try_new(&session).unwrap();
    let teams = SqliteTeamRepository::try_new(&session).unwrap();
    let team = teams.save(Team::new("teamA")).unwrap();
    members.save(Member::with_team("AAA", 10, &team)).unwrap();
    session.flush().unwrap();
    session.clear();

    let member = members.get_by_id(1).unwrap();
    let dto = MemberDto::from_member(&member.borrow()).unwrap();

    assert_eq!(dto.team_name.as_deref(), Some("teamA"));
    let json = serde_json::to_value(&dto).unwrap();
    assert_eq!(json["teamName"], "teamA");
    assert_eq!(json["id"], 1);
}

#[test]
fn dto_from_transient_member_is_rejected() {
    let err = MemberDto::from_member(&Member::new("AAA", 10)).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}
