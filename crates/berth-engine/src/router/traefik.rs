//! Traefik configuration rendering.
//!
//! The router reads a static configuration (entrypoints, providers, ACME) and
//! a directory of dynamic fragments, one per running project plus a default
//! fragment naming the fallback certificate. Every file is signed.

use serde::Serialize;
use std::collections::BTreeMap;

use berth_config::GlobalConfig;
use berth_utils::error::BerthError;
use berth_utils::signature::with_signature;

use crate::router::certs::pair_names;
use crate::router::routing::RoutingEntry;

/// Router-side root of the published tree.
pub const TRAEFIK_ROOT: &str = "/mnt/ddev-global-cache/traefik";
pub const ACME_RESOLVER: &str = "acme";

fn certs_dir() -> String {
    format!("{TRAEFIK_ROOT}/certs")
}

/// Entrypoint name for a host port.
#[must_use]
pub fn entrypoint(port: u16) -> String {
    format!("http-{port}")
}

#[derive(Debug, Serialize)]
struct Dynamic {
    #[serde(skip_serializing_if = "Option::is_none")]
    http: Option<Http>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<Tls>,
}

#[derive(Debug, Default, Serialize)]
struct Http {
    routers: BTreeMap<String, Router>,
    services: BTreeMap<String, Service>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Router {
    entrypoints: Vec<String>,
    rule: String,
    service: String,
    rule_syntax: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<RouterTls>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RouterTls {
    On(bool),
    Resolver {
        #[serde(rename = "certResolver")]
        cert_resolver: &'static str,
    },
}

#[derive(Debug, Serialize)]
struct Service {
    loadbalancer: LoadBalancer,
}

#[derive(Debug, Serialize)]
struct LoadBalancer {
    servers: Vec<Server>,
}

#[derive(Debug, Serialize)]
struct Server {
    url: String,
}

#[derive(Debug, Default, Serialize)]
struct Tls {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    certificates: Vec<CertFiles>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    stores: BTreeMap<String, Store>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CertFiles {
    cert_file: String,
    key_file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Store {
    default_certificate: CertFiles,
}

fn cert_files(base: &str) -> CertFiles {
    let (crt, key) = pair_names(base);
    CertFiles {
        cert_file: format!("{}/{crt}", certs_dir()),
        key_file: format!("{}/{key}", certs_dir()),
    }
}

fn host_rule(hostnames: &[String]) -> String {
    hostnames
        .iter()
        .map(|h| {
            if let Some(rest) = h.strip_prefix("*.") {
                format!("HostRegexp(`^[^.]+\\.{}$`)", rest.replace('.', "\\."))
            } else {
                format!("Host(`{h}`)")
            }
        })
        .collect::<Vec<_>>()
        .join(" || ")
}

fn to_signed_yaml<T: Serialize>(value: &T) -> Result<String, BerthError> {
    let body = serde_yaml::to_string(value)
        .map_err(|e| BerthError::internal(format!("cannot render router config: {e}")))?;
    Ok(with_signature(&body))
}

/// Dynamic fragment for one project.
///
/// `container_of` maps a compose service to the container the router reaches.
pub fn render_project_config(
    project: &str,
    routes: &[RoutingEntry],
    container_of: impl Fn(&str) -> String,
    global: &GlobalConfig,
    has_cert: bool,
) -> Result<String, BerthError> {
    let mut http = Http::default();
    for route in routes {
        let service = format!("{project}-{}", route.service.name);
        let scheme = if route.https { "https" } else { "http" };
        let router = format!("{service}-{}-{scheme}", route.external_port);
        let tls = match (route.https, global.use_letsencrypt) {
            (false, _) => None,
            (true, true) => Some(RouterTls::Resolver {
                cert_resolver: ACME_RESOLVER,
            }),
            (true, false) => Some(RouterTls::On(true)),
        };
        http.routers.insert(
            router,
            Router {
                entrypoints: vec![entrypoint(route.external_port)],
                rule: host_rule(&route.hostnames),
                service: service.clone(),
                rule_syntax: "v3",
                tls,
            },
        );
        http.services.entry(service).or_insert_with(|| Service {
            loadbalancer: LoadBalancer {
                servers: vec![Server {
                    url: format!("http://{}:{}", container_of(&route.service.service), route.service.port),
                }],
            },
        });
    }

    let tls = has_cert.then(|| Tls {
        certificates: vec![cert_files(project)],
        stores: BTreeMap::new(),
    });
    let http = (!http.routers.is_empty()).then_some(http);
    to_signed_yaml(&Dynamic { http, tls })
}

/// `default_config.yaml`: the fallback certificate store.
pub fn render_default_config() -> Result<String, BerthError> {
    let mut stores = BTreeMap::new();
    stores.insert(
        "default".to_string(),
        Store {
            default_certificate: cert_files(crate::router::certs::DEFAULT_CERT_BASE),
        },
    );
    to_signed_yaml(&Dynamic {
        http: None,
        tls: Some(Tls {
            certificates: Vec::new(),
            stores,
        }),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Static {
    global: BTreeMap<&'static str, bool>,
    entry_points: BTreeMap<String, EntryPoint>,
    providers: Providers,
    ping: Ping,
    log: BTreeMap<&'static str, &'static str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    certificates_resolvers: BTreeMap<&'static str, Resolver>,
}

#[derive(Debug, Serialize)]
struct EntryPoint {
    address: String,
}

#[derive(Debug, Serialize)]
struct Providers {
    file: FileProvider,
}

#[derive(Debug, Serialize)]
struct FileProvider {
    directory: String,
    watch: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Ping {
    entry_point: &'static str,
}

#[derive(Debug, Serialize)]
struct Resolver {
    acme: Acme,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Acme {
    email: String,
    storage: String,
    http_challenge: BTreeMap<&'static str, String>,
}

/// Port of the router's health endpoint.
pub const PING_PORT: u16 = 10999;

/// `static_config.yaml` for the enumerated router ports.
pub fn render_static_config(ports: &[u16], global: &GlobalConfig) -> Result<String, BerthError> {
    let mut entry_points: BTreeMap<String, EntryPoint> = ports
        .iter()
        .map(|p| (entrypoint(*p), EntryPoint { address: format!(":{p}") }))
        .collect();
    entry_points.insert(
        "traefik".to_string(),
        EntryPoint {
            address: format!(":{PING_PORT}"),
        },
    );

    let mut certificates_resolvers = BTreeMap::new();
    if global.use_letsencrypt {
        let challenge = ports
            .iter()
            .find(|p| **p == global.router_http_port)
            .or_else(|| ports.first())
            .copied()
            .unwrap_or(global.router_http_port);
        certificates_resolvers.insert(
            ACME_RESOLVER,
            Resolver {
                acme: Acme {
                    email: global.letsencrypt_email.clone(),
                    storage: format!("{TRAEFIK_ROOT}/acme.json"),
                    http_challenge: BTreeMap::from([("entryPoint", entrypoint(challenge))]),
                },
            },
        );
    }

    to_signed_yaml(&Static {
        global: BTreeMap::from([("sendAnonymousUsage", false), ("checkNewVersion", false)]),
        entry_points,
        providers: Providers {
            file: FileProvider {
                directory: format!("{TRAEFIK_ROOT}/config"),
                watch: true,
            },
        },
        ping: Ping {
            entry_point: "traefik",
        },
        log: BTreeMap::from([("level", "ERROR")]),
        certificates_resolvers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::routing::Upstream;
    use serde_yaml::Value;

    fn route(port: u16, https: bool) -> RoutingEntry {
        RoutingEntry {
            hostnames: vec!["alpha.ddev.site".into(), "*.alpha.ddev.site".into()],
            external_port: port,
            service: Upstream {
                name: "web-80".into(),
                service: "web".into(),
                port: 80,
            },
            https,
        }
    }

    fn parse(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_project_config_routes_and_tls() {
        let yaml = render_project_config(
            "alpha",
            &[route(80, false), route(443, true)],
            |svc| format!("ddev-alpha-{svc}"),
            &GlobalConfig::default(),
            true,
        )
        .unwrap();
        assert!(yaml.starts_with(berth_utils::signature::SIGNATURE));
        let v = parse(&yaml);
        let routers = &v["http"]["routers"];
        let http = &routers["alpha-web-80-80-http"];
        assert_eq!(http["entrypoints"][0], Value::from("http-80"));
        assert_eq!(
            http["rule"],
            Value::from("Host(`alpha.ddev.site`) || HostRegexp(`^[^.]+\\.alpha\\.ddev\\.site$`)")
        );
        assert!(http.get("tls").is_none());
        assert_eq!(routers["alpha-web-80-443-https"]["tls"], Value::Bool(true));
        assert_eq!(
            v["http"]["services"]["alpha-web-80"]["loadbalancer"]["servers"][0]["url"],
            Value::from("http://ddev-alpha-web:80")
        );
        assert_eq!(
            v["tls"]["certificates"][0]["certFile"],
            Value::from("/mnt/ddev-global-cache/traefik/certs/alpha.crt")
        );
    }

    #[test]
    fn test_acme_uses_resolver() {
        let global = GlobalConfig {
            use_letsencrypt: true,
            letsencrypt_email: "ops@example.com".into(),
            ..GlobalConfig::default()
        };
        let yaml = render_project_config("alpha", &[route(443, true)], str::to_string, &global, false).unwrap();
        let v = parse(&yaml);
        assert_eq!(
            v["http"]["routers"]["alpha-web-80-443-https"]["tls"]["certResolver"],
            Value::from("acme")
        );
        assert!(v.get("tls").is_none());

        let stat = parse(&render_static_config(&[80, 443], &global).unwrap());
        assert_eq!(stat["certificatesResolvers"]["acme"]["acme"]["email"], Value::from("ops@example.com"));
        assert_eq!(
            stat["certificatesResolvers"]["acme"]["acme"]["httpChallenge"]["entryPoint"],
            Value::from("http-80")
        );
    }

    #[test]
    fn test_static_config_entrypoints() {
        let v = parse(&render_static_config(&[80, 443, 8025], &GlobalConfig::default()).unwrap());
        let eps = v["entryPoints"].as_mapping().unwrap();
        assert_eq!(eps.len(), 4);
        assert_eq!(v["entryPoints"]["http-8025"]["address"], Value::from(":8025"));
        assert!(v.get("certificatesResolvers").is_none());
    }

    #[test]
    fn test_default_config_names_default_pair() {
        let v = parse(&render_default_config().unwrap());
        assert_eq!(
            v["tls"]["stores"]["default"]["defaultCertificate"]["keyFile"],
            Value::from("/mnt/ddev-global-cache/traefik/certs/default_key.key")
        );
    }
}
