//! Item and graph-node coloring handlers.

use crate::error::HostError;
use crate::host::{AnalysisHost, Color, NodeColors};
use std::collections::HashSet;

/// Color every item in the image-relative range `[start, end)`.
///
/// Walks item by item using each item's own size. Returns the number of
/// items colored.
pub fn color_range(host: &dyn AnalysisHost, start: u64, end: u64, color: Color) -> usize {
    let base = host.image_base();
    let end = base.saturating_add(end);
    let mut address = base.saturating_add(start);
    let mut colored = 0;
    while address < end {
        host.set_item_color(address, color);
        colored += 1;
        // A zero-sized item would stall the walk.
        let size = host.item_size(address).max(1);
        address = address.saturating_add(size);
    }
    colored
}

/// Color the flow-chart nodes starting at the given image-relative addresses.
///
/// The function is looked up from the first address; nodes of that function
/// whose start is not listed are left alone. Returns the number of nodes
/// colored.
pub fn color_nodes(
    host: &dyn AnalysisHost,
    addresses: &[u64],
    colors: NodeColors,
) -> Result<usize, HostError> {
    let Some(first) = addresses.first() else {
        return Ok(0);
    };
    let base = host.image_base();
    let anchor = base.saturating_add(*first);
    let chart = host
        .flowchart(anchor)
        .ok_or(HostError::FunctionNotFound(anchor))?;

    let wanted: HashSet<u64> = addresses
        .iter()
        .map(|offset| base.saturating_add(*offset))
        .collect();

    let mut colored = 0;
    for block in chart.blocks.iter().filter(|b| wanted.contains(&b.start)) {
        host.set_node_colors(chart.function_start, block.id, colors)?;
        colored += 1;
    }
    Ok(colored)
}

#[cfg(test)]
mod tests {
    use super::{color_nodes, color_range};
    use crate::host::memory::{test_fixture, FixtureItem, InMemoryHost};
    use crate::host::NodeColors;

    #[test]
    fn walk_visits_each_item_once_with_mixed_sizes() {
        let mut fixture = test_fixture();
        // Items at 0x401000: 1, 7, 3, 15, 2 bytes, then default-sized items.
        let mut at = 0x401000;
        for size in [1u64, 7, 3, 15, 2] {
            fixture.items.push(FixtureItem { address: at, size });
            at += size;
        }
        let host = InMemoryHost::new(fixture);

        let colored = color_range(&host, 0x1000, 0x1000 + 28 + 8, 0xCCFFFF);

        // 5 explicit items covering 28 bytes, then two 4-byte default items.
        assert_eq!(colored, 7);
        let writes = host.color_write_counts();
        let expected = [
            0x401000, 0x401001, 0x401008, 0x40100b, 0x40101a, 0x40101c, 0x401020,
        ];
        assert_eq!(writes.keys().copied().collect::<Vec<_>>(), expected);
        assert!(writes.values().all(|&n| n == 1));
    }

    #[test]
    fn item_straddling_the_end_is_colored_once() {
        let mut fixture = test_fixture();
        fixture.items.push(FixtureItem {
            address: 0x401000,
            size: 6,
        });
        let host = InMemoryHost::new(fixture);

        // End falls inside the first item's successor.
        assert_eq!(color_range(&host, 0x1000, 0x1008, 0x1), 2);
        assert_eq!(host.item_color(0x401000), Some(0x1));
        assert_eq!(host.item_color(0x401006), Some(0x1));
        assert_eq!(host.item_color(0x40100a), None);
    }

    #[test]
    fn empty_and_zero_sized_ranges_terminate() {
        let mut fixture = test_fixture();
        fixture.items.push(FixtureItem {
            address: 0x401000,
            size: 0,
        });
        let host = InMemoryHost::new(fixture);

        assert_eq!(color_range(&host, 0x1000, 0x1000, 0x1), 0);
        assert_eq!(color_range(&host, 0x1000, 0x0ff0, 0x1), 0);
        // Zero-sized item advances by one.
        assert_eq!(color_range(&host, 0x1000, 0x1001, 0x1), 1);
    }

    #[test]
    fn recoloring_is_idempotent() {
        let host = InMemoryHost::new(test_fixture());
        color_range(&host, 0x1000, 0x1040, 0xCC00CC);
        let first = host.item_colors();
        color_range(&host, 0x1000, 0x1040, 0xCC00CC);
        assert_eq!(host.item_colors(), first);
    }

    #[test]
    fn colors_only_listed_nodes() {
        let host = InMemoryHost::new(test_fixture());
        let colors = NodeColors {
            bg_color: 0xCCFFFF,
            frame_color: 0,
        };

        // Blocks of `main` start at 0x1000, 0x1010, 0x1020.
        let colored = color_nodes(&host, &[0x1000, 0x1020], colors).expect("color");
        assert_eq!(colored, 2);
        assert_eq!(host.node_colors(0x401000, 0), Some(colors));
        assert_eq!(host.node_colors(0x401000, 1), None);
        assert_eq!(host.node_colors(0x401000, 2), Some(colors));
    }

    #[test]
    fn node_coloring_outside_functions_fails() {
        let host = InMemoryHost::new(test_fixture());
        let colors = NodeColors {
            bg_color: 1,
            frame_color: 0,
        };
        assert!(color_nodes(&host, &[0xF000], colors).is_err());
        assert_eq!(color_nodes(&host, &[], colors).ok(), Some(0));
    }
}
