use crate::reconcile::mapping::RawRoute;

/// Parses solver stdout into per-vehicle routes.
///
/// Recognized lines look like `Route 1 : 0 5 3 0` (the `#` in `Route #1:` is
/// tolerated); the keyword is case-insensitive. Anything else is ignored, and
/// malformed tokens inside an index list are skipped. Unparseable input
/// yields an empty list, never an error; callers decide whether that is a
/// failure.
pub fn parse_solver_output(output: &str) -> Vec<RawRoute> {
    output.lines().filter_map(parse_route_line).collect()
}

fn parse_route_line(line: &str) -> Option<RawRoute> {
    let (head, tail) = line.trim().split_once(':')?;
    let head = head.trim();

    if !head.get(..5)?.eq_ignore_ascii_case("route") {
        return None;
    }

    let route_number: usize = head[5..].trim().trim_start_matches('#').parse().ok()?;
    let sequence = tail
        .split_whitespace()
        .filter_map(|token| token.parse::<usize>().ok())
        .collect();

    Some(RawRoute {
        route_number,
        sequence,
    })
}

/// Extracts the solver's reported cost line (`Cost <value>`), keeping the
/// value encoded as text; the persister parses it and defaults to zero.
pub fn parse_cost(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("Cost "))
        .map(|cost| cost.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
---- HEURISTIC SEARCH COMPLETE ----
Route 1 : 0 3 5 2 0
route 2: 4 1
Route #3: 6 7
Time 12.4
Cost 1042.7
"#;

    #[test]
    fn parses_route_lines() {
        let routes = parse_solver_output(SAMPLE);

        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0].route_number, 1);
        assert_eq!(routes[0].sequence, vec![0, 3, 5, 2, 0]);
        assert_eq!(routes[1].route_number, 2);
        assert_eq!(routes[1].sequence, vec![4, 1]);
        assert_eq!(routes[2].route_number, 3);
        assert_eq!(routes[2].sequence, vec![6, 7]);
    }

    #[test]
    fn malformed_tokens_are_skipped() {
        let routes = parse_solver_output("Route 1 : 0 x 2 -3 4 0");
        assert_eq!(routes[0].sequence, vec![0, 2, 4, 0]);
    }

    #[test]
    fn garbage_yields_empty_list() {
        assert!(parse_solver_output("no routes here\nRoutes: many").is_empty());
        assert!(parse_solver_output("").is_empty());
        assert!(parse_solver_output("Route x : 1 2").is_empty());
    }

    #[test]
    fn cost_line_is_extracted() {
        assert_eq!(parse_cost(SAMPLE).as_deref(), Some("1042.7"));
        assert_eq!(parse_cost("Route 1 : 0 1 0"), None);
    }
}
