use lessonkit_core::contracts::v1::DetectResult;

/// Set `verbatim_consistent`: for every block that has items, the items'
/// texts joined in order must equal the block byte for byte.
pub fn apply_detect_verbatim(result: &mut DetectResult) {
    result.verbatim_consistent = result.blocks.iter().all(|block| {
        let mut joined = String::new();
        let mut seen = false;
        for item in result.items_raw.iter().filter(|i| i.group_id == block.group_id) {
            joined.push_str(&item.text);
            seen = true;
        }
        !seen || joined == block.block_raw
    });
}
