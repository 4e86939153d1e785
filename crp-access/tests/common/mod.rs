//! Shared fixtures for crp-access integration tests
//!
//! Every test gets its own primary and audit store in a temp directory.
//! The audit sink wraps the real SQLite store with a switch that makes
//! appends fail on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use crp_access::audit::{AccessEvent, AuditSink, RoleSwitchEvent, SqliteAuditStore};
use crp_access::records::{self, NewClient};
use crp_access::{AccessError, AccessServices, ActiveRole, Principal, Result};
use crp_common::db::{init_audit_database, init_database};
use crp_common::{ClientId, ProgramId, UserId};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Real audit store plus a failure switch and an append counter
pub struct SwitchableSink {
    pub store: SqliteAuditStore,
    failing: AtomicBool,
    appended: AtomicUsize,
}

impl SwitchableSink {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Access events successfully appended so far
    pub fn appended(&self) -> usize {
        self.appended.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AccessError::InvalidInput("audit store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SwitchableSink {
    async fn append(&self, event: &AccessEvent) -> Result<()> {
        self.check()?;
        self.store.append(event).await?;
        self.appended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn append_role_switch(&self, event: &RoleSwitchEvent) -> Result<()> {
        self.check()?;
        self.store.append_role_switch(event).await
    }

    async fn history(&self, client: ClientId) -> Result<Vec<AccessEvent>> {
        self.check()?;
        self.store.history(client).await
    }
}

pub struct TestEnv {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub sink: Arc<SwitchableSink>,
    pub services: Arc<AccessServices>,
}

pub async fn setup() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("crp.db")).await.unwrap();
    let audit_pool = init_audit_database(&dir.path().join("crp-audit.db"))
        .await
        .unwrap();

    let sink = Arc::new(SwitchableSink {
        store: SqliteAuditStore::new(audit_pool),
        failing: AtomicBool::new(false),
        appended: AtomicUsize::new(0),
    });
    let services = Arc::new(
        AccessServices::new(pool.clone(), sink.clone())
            .await
            .unwrap(),
    );

    TestEnv {
        _dir: dir,
        pool,
        sink,
        services,
    }
}

impl TestEnv {
    /// Create a program, switching it to Confidential when asked
    pub async fn program(&self, name: &str, confidential: bool) -> ProgramId {
        let program = self.services.registry.create_program(name).await.unwrap();
        if confidential {
            self.services
                .registry
                .set_confidential(program.id, operator())
                .await
                .unwrap();
        }
        program.id
    }

    pub async fn client(&self, first: &str, last: &str, phone: Option<&str>) -> ClientId {
        self.client_born(first, last, phone, None).await
    }

    pub async fn client_born(
        &self,
        first: &str,
        last: &str,
        phone: Option<&str>,
        date_of_birth: Option<NaiveDate>,
    ) -> ClientId {
        records::create_client(
            &self.pool,
            &NewClient {
                first_name: first.to_string(),
                last_name: last.to_string(),
                phone: phone.map(str::to_string),
                date_of_birth,
            },
        )
        .await
        .unwrap()
    }

    pub async fn enrol(&self, client: ClientId, program: ProgramId) {
        records::enrol(&self.pool, client, program).await.unwrap();
    }

    /// Full client history for assertions, bypassing the scoped query
    pub async fn raw_history(&self, client: ClientId) -> Vec<AccessEvent> {
        self.sink.store.history(client).await.unwrap()
    }
}

pub fn operator() -> UserId {
    UserId::generate()
}

pub fn staff(programs: &[ProgramId]) -> Principal {
    Principal::new(UserId::generate(), ActiveRole::Staff, programs.iter().copied())
}

pub fn admin() -> Principal {
    Principal::new(UserId::generate(), ActiveRole::Administrator, [])
}

pub fn dob(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}
