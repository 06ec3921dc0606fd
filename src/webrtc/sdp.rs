//! SDP candidate filtering
//!
//! Constrained device interfaces often carry IPv6 addresses that are not
//! reachable from the viewer; candidates for them are kept out of the
//! advertised description.

const CANDIDATE_PREFIX: &str = "a=candidate:";

/// More colons than an IPv4 candidate line can contain
const MAX_IPV4_LINE_COLONS: usize = 5;

/// More colons than an IPv4 candidate string (without the `a=` prefix) can contain
const MAX_IPV4_CANDIDATE_COLONS: usize = 2;

/// Whether an `a=candidate:` line advertises an IPv6 address
pub fn is_ipv6_candidate_line(line: &str) -> bool {
    line.starts_with(CANDIDATE_PREFIX)
        && (line.contains("::") || line.matches(':').count() > MAX_IPV4_LINE_COLONS)
}

/// Whether a bare candidate string (as gathered locally) looks like IPv6
pub fn is_ipv6_candidate(candidate: &str) -> bool {
    candidate.contains("::") || candidate.matches(':').count() > MAX_IPV4_CANDIDATE_COLONS
}

/// Drop IPv6 candidate lines and normalize line endings to CRLF
pub fn filter_ipv6_candidates(sdp: &str) -> String {
    let mut out = String::with_capacity(sdp.len());
    for line in sdp.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if is_ipv6_candidate_line(line) {
            continue;
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}
