//! Two-hop IP-based geolocation lookup, used only to seed default
//! settings the first time the daemon runs without a settings file.
//! Failure is non-fatal: callers get `None` and fall back to whatever
//! defaults ship in the repository.

use serde::Deserialize;
use serde_derive::Deserialize;

const IP_ENDPOINT: &str = "https://api.ipify.org";
const GEOLOCATION_ENDPOINT: &str = "http://ip-api.com/json/{ip}?fields=status,country,countryCode,city";

#[derive(Debug, Clone, PartialEq)]
pub struct Geolocation {
    pub city: String,
    pub country_code: String,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(rename = "countryCode")]
    country_code: String,
    city: String,
}

pub async fn lookup(client: &reqwest::Client) -> Option<Geolocation> {
    let ip = client.get(IP_ENDPOINT).send().await.ok()?.text().await.ok()?;
    let url = GEOLOCATION_ENDPOINT.replace("{ip}", ip.trim());
    let response: IpApiResponse = client.get(&url).send().await.ok()?.json().await.ok()?;
    if response.status != "success" {
        return None;
    }
    Some(Geolocation {
        city: response.city,
        country_code: response.country_code,
    })
}
