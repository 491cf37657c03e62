//! Prompt and schema texts compiled into the binary.

use lessonkit_core::{ApiVersion, Operation};

pub fn system_prompt(op: Operation, version: ApiVersion) -> Option<&'static str> {
    use ApiVersion::*;
    use Operation::*;
    Some(match (version, op) {
        (V1, Detect) => include_str!("../assets/v1/detect.txt"),
        (V1, Parse) => include_str!("../assets/v1/parse.txt"),
        (V1, Hint) => include_str!("../assets/v1/hint.txt"),
        (V1, Normalize) => include_str!("../assets/v1/normalize.txt"),
        (V1, Check) => include_str!("../assets/v1/check.txt"),
        (V1, Analogue) => include_str!("../assets/v1/analogue.txt"),
        (V2, Parse) => include_str!("../assets/v2/parse.txt"),
        (V2, Hint) => include_str!("../assets/v2/hint.txt"),
        (V2, Ocr) => include_str!("../assets/v2/ocr.txt"),
        _ => return None,
    })
}

pub fn user_prompt(op: Operation, version: ApiVersion) -> Option<&'static str> {
    match (version, op) {
        (ApiVersion::V1, Operation::Parse) => Some(include_str!("../assets/v1/parse.user.txt")),
        (ApiVersion::V2, Operation::Parse) => Some(include_str!("../assets/v2/parse.user.txt")),
        _ => None,
    }
}

pub fn schema(op: Operation, version: ApiVersion) -> Option<&'static str> {
    use ApiVersion::*;
    use Operation::*;
    Some(match (version, op) {
        (V1, Detect) => include_str!("../assets/v1/detect.schema.json"),
        (V1, Parse) => include_str!("../assets/v1/parse.schema.json"),
        (V1, Hint) => include_str!("../assets/v1/hint.schema.json"),
        (V1, Normalize) => include_str!("../assets/v1/normalize.schema.json"),
        (V1, Check) => include_str!("../assets/v1/check.schema.json"),
        (V1, Analogue) => include_str!("../assets/v1/analogue.schema.json"),
        (V2, Parse) => include_str!("../assets/v2/parse.schema.json"),
        (V2, Hint) => include_str!("../assets/v2/hint.schema.json"),
        (V2, Ocr) => include_str!("../assets/v2/ocr.schema.json"),
        _ => return None,
    })
}
