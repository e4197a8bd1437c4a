use crate::config::{parse_duration, Config};
use crate::error::{PiiFilterError, Result, ValidationError};
use std::time::Duration;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_broker(config, &mut errors);
        Self::validate_store(config, &mut errors);
        Self::validate_queues(config, &mut errors);
        Self::validate_retry(config, &mut errors);
        Self::validate_durations(config, &mut errors);
        Self::validate_ocr(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PiiFilterError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_broker(config: &Config, errors: &mut Vec<ValidationError>) {
        let url = &config.broker.url;
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            errors.push(ValidationError::new(
                "broker.url",
                format!("Broker url must use redis:// or rediss://, got '{}'", url),
            ));
        }
    }

    fn validate_store(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.store.host.trim().is_empty() {
            errors.push(ValidationError::new("store.host", "Store host cannot be empty"));
        }

        if config.store.port == 0 {
            errors.push(ValidationError::new("store.port", "Store port must be greater than 0"));
        }

        if config.store.db < 0 {
            errors.push(ValidationError::new(
                "store.db",
                format!("Database index cannot be negative: {}", config.store.db),
            ));
        }

        if let Some(ttl) = &config.store.ttl {
            match parse_duration(ttl) {
                Some(d) if d >= Duration::from_secs(1) => {}
                Some(_) => errors.push(ValidationError::new(
                    "store.ttl",
                    "TTL must be at least one second",
                )),
                None => errors.push(ValidationError::new(
                    "store.ttl",
                    format!("Invalid duration format: {}", ttl),
                )),
            }
        }
    }

    fn validate_queues(config: &Config, errors: &mut Vec<ValidationError>) {
        let queues = [
            ("queues.inbound", &config.queues.inbound),
            ("queues.outbound", &config.queues.outbound),
            ("queues.ocr", &config.queues.ocr),
        ];

        for (path, name) in &queues {
            if name.trim().is_empty() {
                errors.push(ValidationError::new(*path, "Queue name cannot be empty"));
            }
        }

        for (i, (path, name)) in queues.iter().enumerate() {
            if let Some((other, _)) = queues[..i].iter().find(|(_, n)| n == name) {
                errors.push(ValidationError::new(
                    *path,
                    format!("Queue '{}' is also used by {}", name, other),
                ));
            }
        }
    }

    fn validate_retry(config: &Config, errors: &mut Vec<ValidationError>) {
        let base = parse_duration(&config.retry.backoff_base);
        let max = parse_duration(&config.retry.backoff_max);

        if let (Some(base), Some(max)) = (base, max) {
            if base.is_zero() {
                errors.push(ValidationError::new(
                    "retry.backoff_base",
                    "Backoff base must be greater than 0",
                ));
            }
            if base > max {
                errors.push(ValidationError::new(
                    "retry.backoff_max",
                    format!(
                        "Backoff max ({}) is smaller than backoff base ({})",
                        config.retry.backoff_max, config.retry.backoff_base
                    ),
                ));
            }
        }
    }

    fn validate_durations(config: &Config, errors: &mut Vec<ValidationError>) {
        let durations = [
            ("broker.poll_interval", &config.broker.poll_interval),
            ("broker.timeout", &config.broker.timeout),
            ("broker.lease", &config.broker.lease),
            ("broker.recovery_interval", &config.broker.recovery_interval),
            ("store.timeout", &config.store.timeout),
            ("retry.backoff_base", &config.retry.backoff_base),
            ("retry.backoff_max", &config.retry.backoff_max),
            ("retry.redelivery_delay", &config.retry.redelivery_delay),
            ("publish.timeout", &config.publish.timeout),
            ("ocr.timeout", &config.ocr.timeout),
        ];

        for (path, value) in durations {
            if parse_duration(value).is_none() {
                errors.push(ValidationError::new(
                    path,
                    format!("Invalid duration format: {}", value),
                ));
            }
        }

        // A zero timeout would fail every call
        for (path, value) in [
            ("broker.timeout", &config.broker.timeout),
            ("store.timeout", &config.store.timeout),
            ("publish.timeout", &config.publish.timeout),
        ] {
            if parse_duration(value) == Some(Duration::ZERO) {
                errors.push(ValidationError::new(path, "Timeout must be greater than 0"));
            }
        }

        // Leases are kept in whole seconds
        if let Some(lease) = parse_duration(&config.broker.lease) {
            if lease < Duration::from_secs(1) {
                errors.push(ValidationError::new("broker.lease", "Lease must be at least 1s"));
            } else if lease <= config.ocr.timeout() + config.publish.timeout() {
                errors.push(ValidationError::new(
                    "broker.lease",
                    "Lease must exceed ocr.timeout plus publish.timeout",
                ));
            }
        }
    }

    fn validate_ocr(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ocr.binary.trim().is_empty() {
            errors.push(ValidationError::new("ocr.binary", "Tesseract binary cannot be empty"));
        }

        if config.ocr.lang.trim().is_empty() {
            errors.push(ValidationError::new("ocr.lang", "OCR language cannot be empty"));
        }

        if config.ocr.psm > 13 {
            errors.push(ValidationError::new(
                "ocr.psm",
                format!("Page segmentation mode must be 0-13, got {}", config.ocr.psm),
            ));
        }
    }
}
