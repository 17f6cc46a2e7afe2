use weathervane::upstream::{DEFAULT_TIMEOUT, OpenWeatherClient};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const API_KEY: &str = "test-key";

pub fn current_weather(name: &str) -> serde_json::Value {
    serde_json::json!({
        "coord": {"lon": -0.1257, "lat": 51.5085},
        "weather": [{"id": 804, "main": "Clouds", "description": "overcast clouds", "icon": "04d"}],
        "main": {"temp": 10.5, "feels_like": 9.2, "temp_min": 9.0, "temp_max": 11.7, "pressure": 1013, "humidity": 72},
        "wind": {"speed": 3.5, "deg": 240},
        "clouds": {"all": 85},
        "dt": 1705314600,
        "name": name,
        "cod": 200
    })
}

pub fn client(server: &MockServer) -> OpenWeatherClient {
    OpenWeatherClient::new(&server.uri(), API_KEY, DEFAULT_TIMEOUT).unwrap()
}

/// mount an answer for one city, with the query the client must send
pub async fn answer(server: &MockServer, city: &str, response: ResponseTemplate, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("q", city))
        .and(query_param("appid", API_KEY))
        .and(query_param("units", "metric"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}
