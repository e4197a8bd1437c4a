// Tesseract CLI wrapper producing word-level regions

use super::TextDetector;
use crate::config::OcrConfig;
use crate::error::{PiiFilterError, Result};
use crate::facts::Region;
use async_trait::async_trait;
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// TSV row level of a single word
const WORD_LEVEL: i32 = 5;

/// Text detector that shells out to the `tesseract` binary
#[derive(Debug, Clone)]
pub struct TesseractDetector {
    binary: String,
    lang: String,
    psm: u8,
    timeout: Duration,
}

impl TesseractDetector {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            lang: config.lang.clone(),
            psm: config.psm,
            timeout: config.timeout(),
        }
    }

    /// Version line of the configured binary; fails if it cannot be run
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| PiiFilterError::Io {
                source: e,
                context: format!("Failed to run {} --version", self.binary),
            })?;

        // Older releases print the banner on stderr
        let banner = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };

        banner
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| {
                PiiFilterError::Detection(format!("{} printed no version", self.binary))
            })
    }
}

#[async_trait]
impl TextDetector for TesseractDetector {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Region>> {
        let start = Instant::now();

        let mut input = tempfile::NamedTempFile::new().map_err(|e| PiiFilterError::Io {
            source: e,
            context: "Failed to create temporary image file".to_string(),
        })?;
        input.write_all(image).map_err(|e| PiiFilterError::Io {
            source: e,
            context: "Failed to write temporary image file".to_string(),
        })?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                PiiFilterError::Detection(format!("tesseract timed out after {:?}", self.timeout))
            })?
            .map_err(|e| PiiFilterError::Io {
                source: e,
                context: format!("Failed to run {}", self.binary),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PiiFilterError::Detection(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let regions = parse_tsv(&String::from_utf8_lossy(&output.stdout));

        tracing::debug!(
            "Tesseract finished in {} ms with {} regions",
            start.elapsed().as_millis(),
            regions.len()
        );

        Ok(regions)
    }
}

/// Parse Tesseract TSV output into word regions
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. Only word rows with non-blank text are
/// kept; coordinates stay in pixels.
pub fn parse_tsv(tsv: &str) -> Vec<Region> {
    let mut regions = Vec::new();

    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }

        let level: i32 = cols[0].parse().unwrap_or(-1);
        let text = cols[11];
        if level != WORD_LEVEL || text.trim().is_empty() {
            continue;
        }

        let (Ok(left), Ok(top), Ok(width), Ok(height)) = (
            cols[6].parse::<i64>(),
            cols[7].parse::<i64>(),
            cols[8].parse::<i64>(),
            cols[9].parse::<i64>(),
        ) else {
            continue;
        };

        regions.push(Region {
            text: text.to_string(),
            left,
            top,
            right: left + width,
            bottom: top + height,
        });
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t
4\t1\t1\t1\t1\t0\t10\t20\t300\t12\t-1\t
5\t1\t1\t1\t1\t1\t10\t20\t90\t10\t96.5\tHello
5\t1\t1\t1\t1\t2\t110\t20\t80\t11\t95.1\tWorld
5\t1\t1\t1\t1\t3\t200\t20\t5\t10\t10.0\t
5\t1\t1\t1\t1\t4\tbad\t20\t5\t10\t10.0\tbroken
";

    #[test]
    fn test_parse_word_rows() {
        let regions = parse_tsv(SAMPLE);
        assert_eq!(
            regions,
            vec![
                Region::new("Hello", 10, 20, 100, 30),
                Region::new("World", 110, 20, 190, 31),
            ]
        );
        assert!(regions.iter().all(Region::is_well_formed));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("level\tpage_num\n").is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_fails() {
        let config = OcrConfig {
            binary: "/nonexistent/tesseract-binary".to_string(),
            ..OcrConfig::default()
        };
        let detector = TesseractDetector::new(&config);

        assert!(detector.version().await.is_err());
        assert!(detector.detect(b"not an image").await.is_err());
    }
}
