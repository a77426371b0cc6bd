//! Bot filtering against a uap-core signature database
//!
//! Signatures are uap-core `regexes.yaml` rules parsed by `uaparser`: the
//! first matching `user_agent_parsers` rule names the UA family and the first
//! matching `device_parsers` rule names the device family. A hit is automated
//! when the device family is `Spider`, the UA family is `Bot`, or woothee puts
//! the agent in its `crawler` category.
//!
//! Anything that matches no rule is classified `Other` and counted. Failing
//! open keeps unusual but legitimate clients in the numbers.

use thiserror::Error;
use uaparser::{Parser, UserAgentParser};

use crate::assets::Assets;
use crate::config::TrackingConfig;

const EMBEDDED_SIGNATURES: &str = "regexes.yaml";
const SPIDER_DEVICE: &str = "Spider";
const BOT_FAMILY: &str = "Bot";
const CRAWLER_CATEGORY: &str = "crawler";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("failed to read bot signatures from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("embedded bot signatures are missing")]
    MissingEmbedded,
    #[error("failed to parse bot signatures: {0}")]
    Parse(String),
}

/// Families a user agent resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub device_family: String,
    pub ua_family: String,
}

impl Classification {
    pub fn is_bot(&self) -> bool {
        self.device_family == SPIDER_DEVICE || self.ua_family == BOT_FAMILY
    }
}

/// Compiled signature database, loaded once at startup
pub struct SignatureDatabase {
    parser: UserAgentParser,
}

impl SignatureDatabase {
    /// Compile a uap-core `regexes.yaml` document
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, SignatureError> {
        let parser = UserAgentParser::from_bytes(bytes)
            .map_err(|err| SignatureError::Parse(err.to_string()))?;
        Ok(Self { parser })
    }

    /// Ruleset shipped inside the binary
    pub fn embedded() -> Result<Self, SignatureError> {
        let file = Assets::get(EMBEDDED_SIGNATURES).ok_or(SignatureError::MissingEmbedded)?;
        Self::from_yaml(&file.data)
    }

    pub fn from_file(path: &str) -> Result<Self, SignatureError> {
        let bytes = std::fs::read(path).map_err(|source| SignatureError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&bytes)
    }

    pub fn classify(&self, user_agent: &str) -> Classification {
        Classification {
            device_family: self.parser.parse_device(user_agent).family.to_string(),
            ua_family: self.parser.parse_user_agent(user_agent).family.to_string(),
        }
    }
}

/// woothee's built-in crawler dataset
fn is_crawler(user_agent: &str) -> bool {
    woothee::parser::Parser::new()
        .parse(user_agent)
        .is_some_and(|result| result.category == CRAWLER_CATEGORY)
}

/// Human-or-automated gate in front of the aggregation store
pub struct BotFilter {
    signatures: SignatureDatabase,
}

impl BotFilter {
    pub fn new(signatures: SignatureDatabase) -> Self {
        Self { signatures }
    }

    /// Load the configured ruleset, or the embedded one
    pub fn from_config(config: &TrackingConfig) -> Result<Self, SignatureError> {
        let signatures = match config.bot_signatures_path.as_deref() {
            Some(path) => SignatureDatabase::from_file(path)?,
            None => SignatureDatabase::embedded()?,
        };
        Ok(Self::new(signatures))
    }

    pub fn classify(&self, user_agent: &str) -> Classification {
        self.signatures.classify(user_agent)
    }

    pub fn is_bot(&self, user_agent: &str) -> bool {
        if user_agent.trim().is_empty() {
            return false;
        }
        self.classify(user_agent).is_bot() || is_crawler(user_agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOGLEBOT: &str =
        "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
    const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const CUBOT: &str = "Mozilla/5.0 (Linux; Android 10; Cubot X30) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.45 Mobile Safari/537.36";

    const CRAWLERS: &[&str] = &[
        GOOGLEBOT,
        "Mozilla/5.0 (compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm)",
        "Mozilla/5.0 (compatible; AhrefsBot/7.0; +http://ahrefs.com/robot/)",
        "Mozilla/5.0 (compatible; YandexBot/3.0; +http://yandex.com/bots)",
        "facebookexternalhit/1.1 (+http://www.facebook.com/externalhit_uatext.php)",
        "Pingdom.com_bot_version_1.4_(http://www.pingdom.com/)",
        "Mozilla/5.0 (compatible; ia_archiver)",
        "Mozilla/5.0 (compatible; Qwantify/2.4w; +https://www.qwant.com/)/2.4w",
        "Mozilla/5.0 (compatible; Google-Site-Verification/1.0)",
        "Google-Read-Aloud",
        "Datadog/Synthetics",
        "Mozilla/5.0 (compatible; UptimeRobot/2.0; http://www.uptimerobot.com/)",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) HeadlessChrome/120.0.0.0 Safari/537.36",
        "curl/8.4.0",
        "python-requests/2.31.0",
    ];

    const HUMANS: &[&str] = &[
        CHROME,
        IPHONE,
        CUBOT,
        "Mozilla/5.0 (Linux; Android 11; CUBOT_X50) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/100.0.4896.127 Mobile Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    ];

    fn filter() -> BotFilter {
        BotFilter::new(SignatureDatabase::embedded().unwrap())
    }

    #[test]
    fn test_spider_is_bot() {
        let filter = filter();
        let classification = filter.classify(GOOGLEBOT);

        assert_eq!(classification.device_family, "Spider");
        assert_eq!(classification.ua_family, "Googlebot");
        assert!(filter.is_bot(GOOGLEBOT));
    }

    #[test]
    fn test_known_crawlers_are_bots() {
        let filter = filter();
        for user_agent in CRAWLERS {
            let classification = filter.classify(user_agent);
            assert!(
                classification.is_bot(),
                "{user_agent} classified as {classification:?}"
            );
            assert!(filter.is_bot(user_agent), "{user_agent} counted as human");
        }
    }

    #[test]
    fn test_browsers_are_human() {
        let filter = filter();
        for user_agent in HUMANS {
            assert!(
                !filter.is_bot(user_agent),
                "{user_agent} classified as {:?}",
                filter.classify(user_agent)
            );
        }

        assert_eq!(filter.classify(CHROME).ua_family, "Chrome");

        let iphone = filter.classify(IPHONE);
        assert_eq!(iphone.device_family, "iPhone");
        assert_eq!(iphone.ua_family, "Mobile Safari");
    }

    #[test]
    fn test_http_client_family_is_bot() {
        let classification = filter().classify("curl/8.4.0");

        assert_eq!(classification.device_family, "Other");
        assert_eq!(classification.ua_family, "Bot");
    }

    #[test]
    fn test_device_named_like_a_bot_is_human() {
        let classification = filter().classify(CUBOT);

        assert_eq!(classification.device_family, "Cubot");
        assert!(!classification.is_bot());
    }

    #[test]
    fn test_crawler_category_without_signature() {
        let db = SignatureDatabase::from_yaml(
            b"user_agent_parsers: []\nos_parsers: []\ndevice_parsers: []\n",
        )
        .unwrap();
        let filter = BotFilter::new(db);

        assert_eq!(filter.classify(GOOGLEBOT).device_family, "Other");
        assert!(is_crawler(GOOGLEBOT));
        assert!(filter.is_bot(GOOGLEBOT));
        assert!(!is_crawler(CHROME));
    }

    #[test]
    fn test_empty_and_unparseable_fail_open() {
        let filter = filter();

        assert!(!filter.is_bot(""));
        assert!(!filter.is_bot("   "));
        assert!(!filter.is_bot("not a browser at all"));
        assert_eq!(
            filter.classify("%%%"),
            Classification {
                device_family: "Other".to_string(),
                ua_family: "Other".to_string(),
            }
        );
    }

    #[test]
    fn test_replacement_uses_capture_group() {
        let db = SignatureDatabase::from_yaml(
            br#"
user_agent_parsers:
  - regex: '(\w+)Agent/'
    family_replacement: '$1 Client'
os_parsers: []
device_parsers:
  - regex: 'ROBOT'
    regex_flag: 'i'
    device_replacement: 'Spider'
"#,
        )
        .unwrap();

        let classification = db.classify("Mozilla/5.0 TestAgent/1.0 robot");
        assert_eq!(classification.ua_family, "Test Client");
        assert_eq!(classification.device_family, "Spider");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let db = SignatureDatabase::from_yaml(
            br#"
user_agent_parsers:
  - regex: 'Special'
    family_replacement: 'First'
  - regex: '(Special)'
os_parsers: []
device_parsers: []
"#,
        )
        .unwrap();

        assert_eq!(db.classify("Special/1").ua_family, "First");
    }

    #[test]
    fn test_invalid_signatures_fail_to_load() {
        assert!(matches!(
            SignatureDatabase::from_yaml(b"user_agent_parsers: [unterminated"),
            Err(SignatureError::Parse(_))
        ));
        assert!(matches!(
            SignatureDatabase::from_yaml(&[0xff, 0xfe, 0x00, 0x9f]),
            Err(SignatureError::Parse(_))
        ));
        assert!(matches!(
            SignatureDatabase::from_file("/nonexistent/regexes.yaml"),
            Err(SignatureError::Io { .. })
        ));
    }

    #[test]
    fn test_from_config_uses_embedded_by_default() {
        let filter = BotFilter::from_config(&TrackingConfig::default()).unwrap();
        assert!(filter.is_bot(GOOGLEBOT));
    }
}
