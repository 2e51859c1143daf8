//! Instructions and output schemas sent to the extraction service.
//!
//! Every request pins the response to a JSON schema. The schemas use the
//! `generateContent` type vocabulary (`ARRAY`, `OBJECT`, `STRING`, `NUMBER`).

use serde_json::{json, Value};

/// System instruction for table extraction requests.
pub const TABLE_SYSTEM_INSTRUCTION: &str =
    "You are a professional data extraction engine. Output clean, structured JSON only.";

/// User instruction appended after the page images of a table request.
pub const TABLE_INSTRUCTION: &str = "Extract structured tables from these images.
1. Summarize content in 'Document Summary'.
2. Map all tables precisely.
3. Ensure numerical precision.";

/// User instruction appended after the single image of an OCR request.
pub const OCR_INSTRUCTION: &str = "Extract all visible text from this image with bounding boxes.";

/// Array of `{sheetName, headers, rows}`, all three required.
pub fn table_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "sheetName": {
                    "type": "STRING",
                    "description": "A descriptive name for the spreadsheet tab"
                },
                "headers": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "The column headers"
                },
                "rows": {
                    "type": "ARRAY",
                    "items": {
                        "type": "ARRAY",
                        "items": { "type": "STRING" },
                        "description": "Cell values"
                    },
                    "description": "Data rows"
                }
            },
            "required": ["sheetName", "headers", "rows"]
        }
    })
}

/// `{blocks: [{text, box_2d}]}` with boxes as `[ymin, xmin, ymax, xmax]` on 0–1000.
pub fn ocr_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "blocks": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "text": { "type": "STRING" },
                        "box_2d": {
                            "type": "ARRAY",
                            "items": { "type": "NUMBER" },
                            "description": "Bounding box [ymin, xmin, ymax, xmax]"
                        }
                    },
                    "required": ["text", "box_2d"]
                }
            }
        },
        "required": ["blocks"]
    })
}
