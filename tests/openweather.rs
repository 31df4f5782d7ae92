use orion_agent::config::Settings;
use orion_agent::drivers::{Driver, OpenweatherDriver};
use orion_agent::reading::Measurement;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> Settings {
    json!({"apikey": "k3y", "lat": 39.93, "lon": "32.85"})
        .as_object()
        .cloned()
        .unwrap()
}

async fn read(server: &MockServer) -> Option<Measurement> {
    let driver = OpenweatherDriver::with_endpoint(format!("{}/data/2.5/weather", server.uri()));
    tokio::task::spawn_blocking(move || driver.read(&settings()))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn reads_current_weather() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("lat", "39.93"))
        .and(query_param("lon", "32.85"))
        .and(query_param("appid", "k3y"))
        .and(query_param("units", "metric"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "weather": [{"main": "Clouds"}],
            "main": {"temp": 4.567, "feels_like": 1.2, "humidity": 81},
            "name": "Ankara"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let measurement = read(&server).await.unwrap();
    assert_eq!(measurement["temperature"], 4.57);
    assert_eq!(measurement["humidity"], 81.0);
}

#[tokio::test]
async fn rejected_key_yields_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"cod": 401})))
        .mount(&server)
        .await;

    assert!(read(&server).await.is_none());
}

#[tokio::test]
async fn unexpected_body_yields_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"main": {"pressure": 1013}})))
        .mount(&server)
        .await;

    assert!(read(&server).await.is_none());
}
