// JSON message shapes exchanged over the queues

use super::{FactKind, FilteredResult, PartialFact, Region};
use crate::error::{PiiFilterError, Result};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
#[serde(untagged)]
enum OutboundFact<'a> {
    Regions {
        img_id: &'a str,
        bounding_boxes: &'a [Region],
    },
    Terms {
        img_id: &'a str,
        pii_terms: &'a [String],
    },
}

/// Decode an inbound queue message into a typed fact
///
/// The kind is chosen by key presence, `bounding_boxes` taking precedence over
/// `pii_terms`. A message with a string `img_id` but neither key decodes to
/// [`PartialFact::Unrecognized`]. Anything that is not a JSON object with a
/// string `img_id`, or whose collection has the wrong shape, is a
/// [`PiiFilterError::Decode`].
pub fn decode_fact(body: &[u8]) -> Result<PartialFact> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| PiiFilterError::Decode(format!("invalid JSON: {}", e)))?;

    let Value::Object(mut message) = value else {
        return Err(PiiFilterError::Decode(
            "payload is not a JSON object".to_string(),
        ));
    };

    let job_id = match message.remove("img_id") {
        Some(Value::String(id)) => id,
        Some(other) => {
            return Err(PiiFilterError::Decode(format!(
                "img_id must be a string, got {}",
                other
            )))
        }
        None => return Err(PiiFilterError::Decode("missing img_id".to_string())),
    };

    if let Some(boxes) = message.remove(FactKind::Regions.as_str()) {
        let regions: Vec<Region> = serde_json::from_value(boxes).map_err(|e| {
            PiiFilterError::Decode(format!("invalid bounding_boxes for {}: {}", job_id, e))
        })?;
        return Ok(PartialFact::RegionSet { job_id, regions });
    }

    if let Some(terms) = message.remove(FactKind::Terms.as_str()) {
        let terms: Vec<String> = serde_json::from_value(terms).map_err(|e| {
            PiiFilterError::Decode(format!("invalid pii_terms for {}: {}", job_id, e))
        })?;
        return Ok(PartialFact::TermSet { job_id, terms });
    }

    Ok(PartialFact::Unrecognized { job_id })
}

/// Encode a fact as the inbound message a producer would send
pub fn encode_fact(fact: &PartialFact) -> Result<Vec<u8>> {
    let outbound = match fact {
        PartialFact::RegionSet { job_id, regions } => OutboundFact::Regions {
            img_id: job_id,
            bounding_boxes: regions,
        },
        PartialFact::TermSet { job_id, terms } => OutboundFact::Terms {
            img_id: job_id,
            pii_terms: terms,
        },
        PartialFact::Unrecognized { job_id } => {
            return Err(PiiFilterError::UnknownKind {
                job_id: job_id.clone(),
            })
        }
    };

    serde_json::to_vec(&outbound).map_err(|e| PiiFilterError::Json {
        source: e,
        context: format!("Failed to encode fact for {}", fact.job_id()),
    })
}

/// Encode a completed result for the downstream queue
pub fn encode_result(result: &FilteredResult) -> Result<Vec<u8>> {
    serde_json::to_vec(result).map_err(|e| PiiFilterError::Json {
        source: e,
        context: format!("Failed to encode result for {}", result.job_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bounding_boxes() {
        let body = br#"{"img_id":"image_123","bounding_boxes":[{"text":"Hello","left":10,"top":20,"right":100,"bottom":30}]}"#;
        let fact = decode_fact(body).unwrap();
        assert_eq!(
            fact,
            PartialFact::RegionSet {
                job_id: "image_123".to_string(),
                regions: vec![Region::new("Hello", 10, 20, 100, 30)],
            }
        );
    }

    #[test]
    fn test_decode_pii_terms() {
        let fact = decode_fact(br#"{"img_id":"image_123","pii_terms":["Hello","NEIL"]}"#).unwrap();
        assert_eq!(fact.kind(), Some(FactKind::Terms));
        assert_eq!(fact.job_id(), "image_123");
    }

    #[test]
    fn test_decode_unrecognized_shape() {
        let fact = decode_fact(br#"{"img_id":"image_123","unknown_key":"some_value"}"#).unwrap();
        assert_eq!(
            fact,
            PartialFact::Unrecognized {
                job_id: "image_123".to_string()
            }
        );
    }

    #[test]
    fn test_bounding_boxes_win_when_both_present() {
        let fact = decode_fact(br#"{"img_id":"a","pii_terms":["x"],"bounding_boxes":[]}"#).unwrap();
        assert_eq!(fact.kind(), Some(FactKind::Regions));
    }

    #[test]
    fn test_decode_errors() {
        let cases: [&[u8]; 6] = [
            b"not json",
            br#"["img_id"]"#,
            br#"{"pii_terms":["x"]}"#,
            br#"{"img_id":42,"pii_terms":["x"]}"#,
            br#"{"img_id":"a","pii_terms":"x"}"#,
            br#"{"img_id":"a","bounding_boxes":[{"text":"x"}]}"#,
        ];
        for body in cases {
            let err = decode_fact(body).unwrap_err();
            assert!(
                matches!(err, PiiFilterError::Decode(_)),
                "expected decode error for {:?}, got {:?}",
                String::from_utf8_lossy(body),
                err
            );
        }
    }

    #[test]
    fn test_encoded_fact_decodes_back() {
        let fact = PartialFact::TermSet {
            job_id: "job-1".to_string(),
            terms: vec!["Jose".to_string(), "0000003100077280550602".to_string()],
        };
        let body = encode_fact(&fact).unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["img_id"], "job-1");
        assert_eq!(json["pii_terms"][1], "0000003100077280550602");
        assert_eq!(decode_fact(&body).unwrap(), fact);
    }

    #[test]
    fn test_encode_unrecognized_is_rejected() {
        let fact = PartialFact::Unrecognized {
            job_id: "job-1".to_string(),
        };
        assert!(matches!(
            encode_fact(&fact),
            Err(PiiFilterError::UnknownKind { .. })
        ));
    }
}
