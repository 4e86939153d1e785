//! Access auditing
//!
//! - Confidential-bearing access fails closed when the audit store fails
//! - Standard-only access never depends on the audit store
//! - Hash chain and append-only triggers on the audit store
//! - Scoped history query
//! - Role switching

mod common;

use common::{admin, setup, staff};
use crp_access::audit::{AccessAction, AccessOutcome, ChainStatus};
use crp_access::session::{RoleSelection, RoleSession};
use crp_access::{AccessError, ActiveRole};
use crp_common::{ClientId, ProgramId, UserId};

async fn stored_phone(pool: &sqlx::SqlitePool, client: ClientId) -> Option<String> {
    sqlx::query_scalar("SELECT phone FROM clients WHERE id = ?")
        .bind(client.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}

// ============================================================================
// Fail-closed confidential paths
// ============================================================================

#[tokio::test]
async fn test_detail_fails_closed_without_audit() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let client = env.client("Jordan", "Lee", None).await;
    env.enrol(client, css).await;

    env.sink.set_failing(true);
    let result = env.services.directory.detail(&staff(&[css]), client).await;

    assert!(matches!(result, Err(AccessError::AuditWriteFailed(_))));
}

#[tokio::test]
async fn test_update_rolled_back_when_audit_fails() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let client = env.client("Jordan", "Lee", Some("555-0142")).await;
    env.enrol(client, css).await;

    env.sink.set_failing(true);
    let result = env
        .services
        .directory
        .update_phone(&staff(&[css]), client, Some("555-9999"))
        .await;

    assert!(matches!(result, Err(AccessError::AuditWriteFailed(_))));
    assert_eq!(
        stored_phone(&env.pool, client).await.as_deref(),
        Some("555-0142")
    );
}

#[tokio::test]
async fn test_update_commits_with_audit() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let client = env.client("Jordan", "Lee", Some("555-0142")).await;
    env.enrol(client, css).await;

    let updated = env
        .services
        .directory
        .update_phone(&staff(&[css]), client, Some("555-9999"))
        .await
        .unwrap();

    assert!(updated);
    assert_eq!(
        stored_phone(&env.pool, client).await.as_deref(),
        Some("555-9999")
    );
    let history = env.raw_history(client).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, AccessAction::Update);
}

#[tokio::test]
async fn test_update_that_fails_to_commit_is_marked_aborted() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let client = env.client("Jordan", "Lee", Some("555-0142")).await;
    env.enrol(client, css).await;

    // A deferred foreign key violation only surfaces at COMMIT
    for statement in [
        "CREATE TABLE phone_guard (program_id TEXT REFERENCES programs(id) DEFERRABLE INITIALLY DEFERRED)",
        "CREATE TRIGGER phone_guard_on_update AFTER UPDATE OF phone ON clients BEGIN INSERT INTO phone_guard VALUES ('no-such-program'); END",
    ] {
        sqlx::query(statement).execute(&env.pool).await.unwrap();
    }

    let result = env
        .services
        .directory
        .update_phone(&staff(&[css]), client, Some("555-9999"))
        .await;

    assert!(matches!(result, Err(AccessError::Database(_))));
    assert_eq!(
        stored_phone(&env.pool, client).await.as_deref(),
        Some("555-0142")
    );
    let outcomes: Vec<(AccessAction, AccessOutcome)> = env
        .raw_history(client)
        .await
        .iter()
        .map(|e| (e.action, e.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (AccessAction::Update, AccessOutcome::Granted),
            (AccessAction::Update, AccessOutcome::Aborted),
        ]
    );
}

#[tokio::test]
async fn test_standard_paths_ignore_audit_failure() {
    let env = setup().await;
    let league = env.program("Basketball League", false).await;
    let client = env.client("Riley", "Park", Some("555-0001")).await;
    env.enrol(client, league).await;

    env.sink.set_failing(true);
    let principal = staff(&[league]);

    assert_eq!(
        env.services
            .directory
            .list_program(&principal, league)
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(env
        .services
        .directory
        .update_phone(&principal, client, None)
        .await
        .unwrap());
    assert_eq!(stored_phone(&env.pool, client).await, None);
    assert_eq!(env.sink.appended(), 0);
}

#[tokio::test]
async fn test_ended_confidential_enrolment_still_audited() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let league = env.program("Basketball League", false).await;

    let client = env.client("Jordan", "Lee", None).await;
    let past = crp_access::records::enrol(&env.pool, client, css)
        .await
        .unwrap();
    crp_access::records::end_enrolment(&env.pool, past)
        .await
        .unwrap();
    env.enrol(client, league).await;

    let league_staff = staff(&[league]);
    let view = env
        .services
        .directory
        .detail(&league_staff, client)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.enrolments.len(), 1);

    let history = env.raw_history(client).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].principal_id, league_staff.user_id);
    assert_eq!(history[0].active_role, ActiveRole::Staff);
    assert_eq!(history[0].action, AccessAction::Detail);
    assert_eq!(history[0].outcome, AccessOutcome::Granted);
}

// ============================================================================
// Audit store integrity
// ============================================================================

#[tokio::test]
async fn test_chain_intact_after_mixed_accesses() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let principal = staff(&[css]);

    let mut clients = Vec::new();
    for i in 0..3 {
        let client = env.client(&format!("Client{}", i), "Lee", None).await;
        env.enrol(client, css).await;
        clients.push(client);
    }

    env.services
        .directory
        .list_program(&principal, css)
        .await
        .unwrap();
    env.services
        .directory
        .export(&principal, &clients)
        .await
        .unwrap();

    assert_eq!(
        env.sink.store.verify_chain().await.unwrap(),
        ChainStatus::Intact { events: 6 }
    );
}

#[tokio::test]
async fn test_audit_rows_cannot_be_rewritten() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let client = env.client("Jordan", "Lee", None).await;
    env.enrol(client, css).await;
    env.services
        .directory
        .detail(&staff(&[css]), client)
        .await
        .unwrap();

    let pool = env.sink.store.pool();
    assert!(sqlx::query("UPDATE access_events SET action = 'list'")
        .execute(pool)
        .await
        .is_err());
    assert!(sqlx::query("DELETE FROM access_events")
        .execute(pool)
        .await
        .is_err());
    assert_eq!(env.raw_history(client).await.len(), 1);
}

// ============================================================================
// Scoped history query
// ============================================================================

#[tokio::test]
async fn test_history_for_assigned_confidential_staff() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let client = env.client("Jordan", "Lee", None).await;
    env.enrol(client, css).await;

    let css_staff = staff(&[css]);
    env.services
        .directory
        .detail(&css_staff, client)
        .await
        .unwrap();

    let history = env
        .services
        .auditor
        .query_access_history(&css_staff, client)
        .await
        .unwrap()
        .unwrap();

    let actions: Vec<AccessAction> = history.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AccessAction::Detail, AccessAction::HistoryQuery]);
}

#[tokio::test]
async fn test_history_denied_to_admin_and_recorded() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let client = env.client("Jordan", "Lee", None).await;
    env.enrol(client, css).await;

    let outsider = admin();
    assert_eq!(
        env.services
            .auditor
            .query_access_history(&outsider, client)
            .await
            .unwrap(),
        None
    );

    let history = env.raw_history(client).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].principal_id, outsider.user_id);
    assert_eq!(history[0].outcome, AccessOutcome::Denied);
}

#[tokio::test]
async fn test_history_denied_for_standard_only_client() {
    let env = setup().await;
    let league = env.program("Basketball League", false).await;
    let client = env.client("Riley", "Park", None).await;
    env.enrol(client, league).await;

    assert_eq!(
        env.services
            .auditor
            .query_access_history(&staff(&[league]), client)
            .await
            .unwrap(),
        None
    );
}

// ============================================================================
// Role sessions
// ============================================================================

fn two_roles(program: crp_common::ProgramId) -> Vec<RoleSelection> {
    vec![
        RoleSelection {
            role: ActiveRole::Staff,
            programs: vec![program],
        },
        RoleSelection {
            role: ActiveRole::Administrator,
            programs: vec![],
        },
    ]
}

#[tokio::test]
async fn test_role_switch_is_recorded() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let user = UserId::generate();
    let mut session = RoleSession::start(user, two_roles(css), 0).unwrap();

    let principal = session
        .switch_to(&env.services.auditor, 1)
        .await
        .unwrap();
    assert_eq!(principal.active_role, ActiveRole::Administrator);
    assert!(!principal.is_assigned(&css));

    // Re-selecting the active role records nothing
    session.switch_to(&env.services.auditor, 1).await.unwrap();

    assert_eq!(env.sink.store.role_switch_count(user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_role_switch_fails_closed() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let user = UserId::generate();
    let mut session = RoleSession::start(user, two_roles(css), 0).unwrap();

    env.sink.set_failing(true);
    let result = session.switch_to(&env.services.auditor, 1).await;

    assert!(matches!(result, Err(AccessError::AuditWriteFailed(_))));
    assert_eq!(session.active_index(), 0);
    assert_eq!(session.principal().active_role, ActiveRole::Staff);
}

#[tokio::test]
async fn test_staff_to_staff_switch_records_program_sets() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let league = env.program("Basketball League", false).await;
    let user = UserId::generate();
    let selections = vec![
        RoleSelection {
            role: ActiveRole::Staff,
            programs: vec![league],
        },
        RoleSelection {
            role: ActiveRole::Staff,
            programs: vec![css],
        },
    ];
    let mut session = RoleSession::start(user, selections, 0).unwrap();

    let principal = session
        .switch_to(&env.services.auditor, 1)
        .await
        .unwrap();
    assert!(principal.is_assigned(&css));

    let switches = env.sink.store.role_switches(user).await.unwrap();
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].from_role, ActiveRole::Staff);
    assert_eq!(switches[0].to_role, ActiveRole::Staff);
    assert_eq!(switches[0].from_programs, vec![league]);
    assert_eq!(switches[0].to_programs, vec![css]);
}

#[tokio::test]
async fn test_switch_to_malformed_selection_rejected() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let user = UserId::generate();
    let mut selections = two_roles(css);
    selections.push(RoleSelection {
        role: ActiveRole::Staff,
        programs: vec![ProgramId::from_uuid(uuid::Uuid::nil())],
    });
    let mut session = RoleSession::start(user, selections, 0).unwrap();

    let result = session.switch_to(&env.services.auditor, 2).await;

    assert!(matches!(result, Err(AccessError::FilterInputInvalid(_))));
    assert_eq!(session.active_index(), 0);
    assert_eq!(env.sink.store.role_switch_count(user).await.unwrap(), 0);
}
