use std::path::Path;

use anyhow::Result;

use reelcast::timing::{self, CROSSFADE_SECS};

use super::read_request;

pub fn cmd_plan(request: &Path) -> Result<()> {
    let request = read_request(request)?;
    request.validate()?;

    let plan = timing::allocate(&request.segments);
    println!("🎬 {} segments, target {:.1}s", plan.len(), timing::target_duration(&request.segments));

    for (i, (segment, duration)) in request.segments.iter().zip(plan.as_slice()).enumerate() {
        println!(
            "  {:>2}. {:>5.1}s  weight {:>5.1}  {}",
            i + 1,
            duration,
            timing::weight(&segment.voiceover),
            truncate_text(&segment.voiceover, 60)
        );
    }

    println!("   Total:     {:.1}s", plan.raw_sum());
    println!(
        "   On screen: {:.1}s ({} crossfades of {CROSSFADE_SECS:.1}s)",
        plan.displayed_duration(CROSSFADE_SECS),
        plan.transition_count()
    );

    Ok(())
}

fn truncate_text(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        collapsed
    } else {
        let cut: String = collapsed.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
