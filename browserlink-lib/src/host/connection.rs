use url::{Host, Url};

use super::path::{normalize_directory_path, same_normalized_path};

pub const REQUEST_SIGNAL_SUFFIX: &str = ".RequestSignal";
pub const READY_SIGNAL_SUFFIX: &str = ".ReadySignal";
pub const VERSION2_SUFFIX: &str = ".v2";

pub const HOST_NAME_KEY: &str = "host-name";
pub const HTTP_PORT_KEY: &str = "http-port";
pub const HTTPS_PORT_KEY: &str = "https-port";
pub const FETCH_SCRIPT_VERB_KEY: &str = "verb-fetch-script";
pub const INJECT_SCRIPT_VERB_KEY: &str = "verb-inject-script";
pub const MAPPING_DATA_VERB_KEY: &str = "verb-mapping-data";
pub const SERVER_DATA_VERB_KEY: &str = "verb-server-data";
pub const PROJECT_DATA_KEY: &str = "project";

/// Well-known values of V1 instance files, which carry no properties.
const V1_DEFAULT_PROPERTIES: &[(&str, &str)] = &[
    (HOST_NAME_KEY, "localhost"),
    (FETCH_SCRIPT_VERB_KEY, "browserLink"),
    (INJECT_SCRIPT_VERB_KEY, "injectScriptLink"),
    (MAPPING_DATA_VERB_KEY, "sendMappingData"),
];

/// How to reach one host instance and which projects it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConnectionData {
    /// Fetch-script URL over http; empty when the instance file lacks the data.
    pub connection_string: String,
    /// Fetch-script URL over https; empty when the instance file lacks the data.
    pub ssl_connection_string: String,
    pub request_signal_name: String,
    pub ready_signal_name: String,
    pub inject_script_verb: Option<String>,
    pub mapping_data_verb: Option<String>,
    pub server_data_verb: Option<String>,
    /// Normalized project roots, see [`normalize_directory_path`].
    pub project_paths: Vec<String>,
}

impl HostConnectionData {
    /// `normalized_app_path` must already be normalized.
    pub fn serves(&self, normalized_app_path: &str) -> bool {
        self.project_paths
            .iter()
            .any(|p| same_normalized_path(p, normalized_app_path))
    }

    /// The http connection string as a URL, if it is one.
    pub fn connection_url(&self) -> Option<Url> {
        parse_absolute(&self.connection_string)
    }
}

/// Parse a V1 instance file: http string, https string, then one project
/// root per line. At least one project is required.
pub fn parse_v1(instance_name: &str, lines: &[String]) -> Option<HostConnectionData> {
    if lines.len() <= 2 {
        return None;
    }

    let connection_string = lines[0].clone();
    let ssl_connection_string = lines[1].clone();
    let project_paths = lines[2..].iter().map(|l| normalize_directory_path(l)).collect();

    let properties: Vec<(String, String)> = V1_DEFAULT_PROPERTIES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let verbs = VerbUrls::build(&properties, &connection_string);

    Some(HostConnectionData {
        connection_string,
        ssl_connection_string,
        request_signal_name: format!("{}{}", instance_name, REQUEST_SIGNAL_SUFFIX),
        ready_signal_name: format!("{}{}", instance_name, READY_SIGNAL_SUFFIX),
        inject_script_verb: verbs.inject_script,
        mapping_data_verb: verbs.mapping_data,
        server_data_verb: verbs.server_data,
        project_paths,
    })
}

/// Parse a V2 instance file of `key:value` lines into one connection per
/// `project:<path>;<key>` entry. `instance_name` includes the `.v2` suffix.
pub fn parse_v2(instance_name: &str, lines: &[String]) -> Vec<HostConnectionData> {
    let base = instance_name.strip_suffix(VERSION2_SUFFIX).unwrap_or(instance_name);
    let request_signal_name = format!("{}{}", base, REQUEST_SIGNAL_SUFFIX);
    let ready_signal_name = format!("{}{}", base, READY_SIGNAL_SUFFIX);

    let (properties, projects) = parse_values(lines);

    projects
        .into_iter()
        .map(|(key, path)| {
            let (connection_string, ssl_connection_string) = connection_strings(&properties, &key);
            let verbs = VerbUrls::build(&properties, &connection_string);

            HostConnectionData {
                connection_string,
                ssl_connection_string,
                request_signal_name: request_signal_name.clone(),
                ready_signal_name: ready_signal_name.clone(),
                inject_script_verb: verbs.inject_script,
                mapping_data_verb: verbs.mapping_data,
                server_data_verb: verbs.server_data,
                project_paths: vec![normalize_directory_path(&path)],
            }
        })
        .collect()
}

type Pairs = Vec<(String, String)>;

fn lookup<'a>(pairs: &'a Pairs, key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn upsert(pairs: &mut Pairs, key: &str, value: &str) {
    match pairs.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => pairs.push((key.to_string(), value.to_string())),
    }
}

/// Split lines into properties and `(project key, project path)` pairs, in
/// first-seen order. Later duplicates overwrite earlier values.
fn parse_values(lines: &[String]) -> (Pairs, Pairs) {
    let mut properties = Pairs::new();
    let mut projects = Pairs::new();

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        if key == PROJECT_DATA_KEY {
            let mut parts = value.split(';');
            let (Some(path), Some(project_key)) = (parts.next(), parts.next()) else {
                continue;
            };
            upsert(&mut projects, project_key, path);
        } else {
            upsert(&mut properties, key, value);
        }
    }

    (properties, projects)
}

fn connection_strings(properties: &Pairs, project_key: &str) -> (String, String) {
    let (Some(host), Some(fetch_verb)) = (lookup(properties, HOST_NAME_KEY), lookup(properties, FETCH_SCRIPT_VERB_KEY)) else {
        return (String::new(), String::new());
    };

    let http = lookup(properties, HTTP_PORT_KEY)
        .map(|port| format!("http://{}:{}/{}/{}", host, port, project_key, fetch_verb))
        .unwrap_or_default();
    let https = lookup(properties, HTTPS_PORT_KEY)
        .map(|port| format!("https://{}:{}/{}/{}", host, port, project_key, fetch_verb))
        .unwrap_or_default();

    (http, https)
}

#[derive(Default)]
struct VerbUrls {
    inject_script: Option<String>,
    mapping_data: Option<String>,
    server_data: Option<String>,
}

impl VerbUrls {
    /// Resolve each configured verb name against the http connection string.
    fn build(properties: &Pairs, connection_string: &str) -> Self {
        let Some(base) = parse_absolute(connection_string) else {
            return Self::default();
        };

        let resolve = |key: &str| {
            lookup(properties, key)
                .and_then(|verb| base.join(verb).ok())
                .map(|url| url.to_string())
        };

        Self {
            inject_script: resolve(INJECT_SCRIPT_VERB_KEY),
            mapping_data: resolve(MAPPING_DATA_VERB_KEY),
            server_data: resolve(SERVER_DATA_VERB_KEY),
        }
    }
}

/// Absolute URL with a plain DNS-style or IP host.
fn parse_absolute(s: &str) -> Option<Url> {
    if s.is_empty() {
        return None;
    }
    let url = Url::parse(s).ok()?;
    let valid_host = match url.host()? {
        Host::Domain(name) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
        }
        Host::Ipv4(_) | Host::Ipv6(_) => true,
    };
    valid_host.then_some(url)
}
