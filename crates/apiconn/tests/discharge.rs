//! 委托凭证 discharge 流程测试

mod support;

use apiconn::{
    ConnError, Connector, Credential, DelegatedToken, DischargeChallenge, Discharger,
    EndpointSet, ErrorKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use support::{LoginReply, MockDialer, login_discharge, login_ok, policy};

#[derive(Debug, Default)]
struct CountingDischarger {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl Discharger for CountingDischarger {
    async fn discharge(
        &self,
        challenge: &DischargeChallenge,
    ) -> anyhow::Result<Vec<DelegatedToken>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            anyhow::bail!("identity provider unreachable");
        }
        assert_eq!(challenge.token.as_str(), "caveat-1");
        Ok(vec![DelegatedToken::new(format!("discharge-{n}"))])
    }
}

fn endpoints() -> EndpointSet {
    EndpointSet::new(["a:17070"])
}

fn delegated() -> Credential {
    Credential::delegated(vec![DelegatedToken::new("root-macaroon")])
}

#[tokio::test(start_paused = true)]
async fn test_discharge_required_is_returned_without_discharger() {
    let dialer = Arc::new(
        MockDialer::reachable("a:17070")
            .with_login(vec![LoginReply::Ok(login_discharge("caveat-1"))]),
    );

    let err = Connector::new(policy(dialer.clone()))
        .open(&endpoints(), &delegated())
        .await
        .unwrap_err();

    match err {
        ConnError::DischargeRequired(challenge) => {
            assert_eq!(challenge.token.as_str(), "caveat-1");
            assert!(challenge.message.contains("third party"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(dialer.transport().close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_discharger_retries_handshake_once() {
    let dialer = Arc::new(MockDialer::reachable("a:17070").with_login(vec![
        LoginReply::Ok(login_discharge("caveat-1")),
        LoginReply::Ok(login_ok()),
    ]));
    let discharger = Arc::new(CountingDischarger::default());

    let conn = Connector::new(policy(dialer.clone()))
        .with_discharger(discharger.clone(), 1)
        .open(&endpoints(), &delegated())
        .await
        .unwrap();

    assert!(conn.is_authenticated());
    assert_eq!(discharger.calls.load(Ordering::SeqCst), 1);

    // 同一传输上重新握手，并携带新的 discharge
    let transport = dialer.transport();
    assert_eq!(dialer.attempts().len(), 1);
    let logins: Vec<_> = transport
        .calls()
        .into_iter()
        .filter(|r| r.facade == "Admin")
        .collect();
    assert_eq!(logins.len(), 2);
    assert_eq!(
        logins[1].params["macaroons"],
        serde_json::json!(["root-macaroon", "discharge-1"])
    );
}

#[tokio::test(start_paused = true)]
async fn test_discharge_rounds_are_bounded() {
    let dialer = Arc::new(MockDialer::reachable("a:17070").with_login(vec![
        LoginReply::Ok(login_discharge("caveat-1")),
        LoginReply::Ok(login_discharge("caveat-1")),
        LoginReply::Ok(login_discharge("caveat-1")),
        LoginReply::Ok(login_discharge("caveat-1")),
    ]));
    let discharger = Arc::new(CountingDischarger::default());

    let err = Connector::new(policy(dialer.clone()))
        .with_discharger(discharger.clone(), 2)
        .open(&endpoints(), &delegated())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DischargeRequired);
    assert_eq!(discharger.calls.load(Ordering::SeqCst), 2);
    assert_eq!(dialer.transport().calls_to("Admin"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_discharger_failure_is_surfaced() {
    let dialer = Arc::new(
        MockDialer::reachable("a:17070")
            .with_login(vec![LoginReply::Ok(login_discharge("caveat-1"))]),
    );
    let discharger = Arc::new(CountingDischarger {
        fail: true,
        ..Default::default()
    });

    let err = Connector::new(policy(dialer.clone()))
        .with_discharger(discharger, 3)
        .open(&endpoints(), &delegated())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DischargeFailed);
    assert!(err.to_string().contains("identity provider unreachable"));
    assert_eq!(dialer.transport().close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_discharge_request_for_password_login_is_rejected() {
    let dialer = Arc::new(
        MockDialer::reachable("a:17070")
            .with_login(vec![LoginReply::Ok(login_discharge("caveat-1"))]),
    );
    let credential = Credential::password("user-admin".parse().unwrap(), "secret");

    let err = Connector::new(policy(dialer))
        .open(&endpoints(), &credential)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
}
