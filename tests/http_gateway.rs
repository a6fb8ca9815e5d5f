//! HTTP gateway tests against a mock CM server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cm_onboard::error::GatewayError;
use cm_onboard::gateway::{
    CmGateway, CmPartyRequest, CmRelatedParty, CmReply, GatewayConfig, HttpCmGateway,
};
use cm_onboard::record::{AcceptedStatus, EntityKind, PartyType};

fn request() -> CmPartyRequest {
    CmPartyRequest {
        entity_category: EntityKind::Customer,
        party_type: PartyType::Standalone,
        external_reference: "8d4f5a0e-0000-4000-8000-000000000001".to_string(),
        party_id: None,
        name: "Globex".to_string(),
        identification: vec![],
        contact_medium: vec![],
        address: vec![],
        related_party: vec![CmRelatedParty {
            role: "DIVISION".to_string(),
            id: "10".to_string(),
        }],
    }
}

fn gateway(server: &MockServer) -> HttpCmGateway {
    let config = GatewayConfig::new(format!("{}/", server.uri()))
        .with_api_key("cm-test-key")
        .with_timeout(Duration::from_secs(2));
    HttpCmGateway::new(config).unwrap()
}

#[tokio::test]
async fn create_success_returns_party_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/onboarding"))
        .and(header("authorization", "Bearer cm-test-key"))
        .and(body_partial_json(json!({
            "entityCategory": "CUSTOMER",
            "externalReference": "8d4f5a0e-0000-4000-8000-000000000001",
            "relatedParty": [{"role": "DIVISION", "id": "10"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "S",
            "message": "created",
            "relatedParty": [{"id": "BP123", "role": "SOLD_TO"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = gateway(&server).create_onboarding(&request()).await.unwrap();

    assert_eq!(
        reply,
        CmReply::Accepted {
            status: AcceptedStatus::Complete,
            party_id: "BP123".to_string(),
            message: Some("created".to_string()),
        }
    );
}

#[tokio::test]
async fn business_failure_on_client_error_status_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/onboarding"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "status": "F",
            "code": "CMONB1",
            "reason": "Locked",
            "message": "Partner locked"
        })))
        .mount(&server)
        .await;

    let reply = gateway(&server).create_onboarding(&request()).await.unwrap();

    assert_eq!(
        reply,
        CmReply::Rejected {
            code: "CMONB1".to_string(),
            reason: "Locked".to_string(),
            message: "Partner locked".to_string(),
        }
    );
}

#[tokio::test]
async fn server_error_without_body_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/onboarding"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .create_onboarding(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unreachable { .. }), "{err:?}");
}

#[tokio::test]
async fn garbage_success_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/onboarding"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .create_onboarding(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Malformed { .. }), "{err:?}");
}

#[tokio::test]
async fn success_without_party_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/onboarding"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "S"})))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .create_onboarding(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Malformed { .. }), "{err:?}");
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/onboarding"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "S", "relatedParty": [{"id": "BP1"}]}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = GatewayConfig::new(server.uri()).with_timeout(Duration::from_millis(50));
    let err = HttpCmGateway::new(config)
        .unwrap()
        .create_onboarding(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout { .. }), "{err:?}");
}

#[tokio::test]
async fn update_puts_to_party_path() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/onboarding/BP123"))
        .and(body_partial_json(json!({"partyId": "BP123"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "S",
            "relatedParty": [{"id": "BP123"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut update = request();
    update.party_id = Some("BP123".to_string());
    let reply = gateway(&server).update_onboarding(&update).await.unwrap();

    assert!(matches!(reply, CmReply::Accepted { .. }));
}

#[tokio::test]
async fn update_without_party_id_never_leaves_the_process() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = gateway(&server)
        .update_onboarding(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Malformed { .. }));
}

#[tokio::test]
async fn read_side_lists_and_fetches_parties() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/parties/BP123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "BP123",
            "name": "Globex",
            "status": "ACTIVE"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/parties"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "BP123", "name": "Globex"},
            {"id": "BP124", "name": "Initech"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/parties/BP404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let gw = gateway(&server);
    let party = gw.get_by_external_id("BP123").await.unwrap();
    assert_eq!(party.name, "Globex");
    assert_eq!(party.status.as_deref(), Some("ACTIVE"));

    let all = gw.list().await.unwrap();
    assert_eq!(all.len(), 2);

    let err = gw.get_by_external_id("BP404").await.unwrap_err();
    assert!(matches!(err, GatewayError::Unreachable { .. }));
}
