use super::*;

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            active_hours: 0,
            schedule: "0,1,2,3,4,5".to_string(),
            tomorrow_cutoff_hour: 18,
            refresh_timeout_secs: 120,
            background_refresh: false,
            max_consecutive_refresh_failures: 24,
        }
    }
}

impl Default for EntsoeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://web-api.tp.entsoe.eu/api".to_string(),
            security_token: String::new(),
            bidding_zone: "10YFI-1--------U".to_string(),
            request_timeout_secs: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "http://10.0.0.84/relay/0".to_string(),
            request_timeout_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: None,
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: "Europe/Helsinki".to_string(),
            dry_run: false,
            control: ControlConfig::default(),
            entsoe: EntsoeConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
