use crate::model::{CollectConfig, PageReply, ProxyRequest};
use anyhow::{Context, Result};
use reqwest::Url;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;

/// Path of the formation listing endpoint under the API base.
const SPF_PATH: &str = "2024/portal/spf";

/// Source of raw page replies. The relay client is the real one; tests script their own.
pub trait PageFetcher {
    fn fetch_page(
        &self,
        program_id: &str,
        offset: u64,
    ) -> impl Future<Output = Result<PageReply>> + Send;
}

/// Posts page requests to the local relay, dressed with the portal's browser headers.
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    relay_url: Url,
    spf_url: Url,
    headers: BTreeMap<String, String>,
    procurement_code: u32,
}

impl RelayClient {
    pub fn new(cfg: &CollectConfig) -> Result<Self> {
        let relay_url = Url::parse(&cfg.relay_url)
            .with_context(|| format!("invalid relay url {}", cfg.relay_url))?;
        let api_base = Url::parse(&cfg.api_base)
            .with_context(|| format!("invalid api base {}", cfg.api_base))?;
        let spf_url = api_base
            .join(SPF_PATH)
            .context("build listing endpoint url")?;
        let api_host = api_base
            .host_str()
            .context("api base has no host")?
            .to_string();

        let http = reqwest::Client::builder()
            .build()
            .context("build relay http client")?;

        Ok(Self {
            http,
            relay_url,
            spf_url,
            headers: browser_headers(&cfg.user_agent, &api_host, &cfg.portal_origin),
            procurement_code: cfg.procurement_code,
        })
    }

    /// The relay body for one page of one program.
    pub fn build_request(&self, program_id: &str, offset: u64) -> ProxyRequest {
        let mut url = self.spf_url.clone();
        url.query_pairs_mut()
            .append_pair("kode_ref_pend", program_id)
            .append_pair("pengadaan_kd", &self.procurement_code.to_string())
            .append_pair("offset", &offset.to_string());

        ProxyRequest {
            url: url.into(),
            payload: json!({
                "kode_ref_pend": program_id,
                "pengadaan_kd": self.procurement_code,
                "offset": offset,
            }),
            headers: self.headers.clone(),
        }
    }
}

impl PageFetcher for RelayClient {
    async fn fetch_page(&self, program_id: &str, offset: u64) -> Result<PageReply> {
        let body = self.build_request(program_id, offset);
        let resp = self
            .http
            .post(self.relay_url.clone())
            .json(&body)
            .send()
            .await
            .context("relay request failed")?;
        let status = resp.status().as_u16();
        let body = resp.text().await.context("read relay response body")?;
        Ok(PageReply { status, body })
    }
}

/// Header set a desktop Chrome sends to the portal API.
fn browser_headers(
    user_agent: &str,
    api_host: &str,
    portal_origin: &str,
) -> BTreeMap<String, String> {
    let origin = portal_origin.trim_end_matches('/');
    [
        ("User-Agent", user_agent.to_string()),
        ("Accept", "application/json, text/plain, */*".to_string()),
        ("Accept-Encoding", "gzip, deflate, br, zstd".to_string()),
        ("Accept-Language", "id-ID,id;q=0.9,en-US;q=0.8,en;q=0.7".to_string()),
        ("Connection", "keep-alive".to_string()),
        ("Host", api_host.to_string()),
        ("Origin", origin.to_string()),
        ("Referer", format!("{origin}/")),
        ("Sec-Fetch-Dest", "empty".to_string()),
        ("Sec-Fetch-Mode", "cors".to_string()),
        ("Sec-Fetch-Site", "same-site".to_string()),
        (
            "sec-ch-ua",
            r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#.to_string(),
        ),
        ("sec-ch-ua-mobile", "?0".to_string()),
        ("sec-ch-ua-platform", r#""Windows""#.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
