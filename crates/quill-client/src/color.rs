use uuid::Uuid;

/// Display colours handed out to collaborators.
pub const PALETTE: [&str; 8] = [
    "#e11d48", "#2563eb", "#16a34a", "#d97706", "#9333ea", "#0891b2", "#db2777", "#65a30d",
];

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Deterministic colour for a user: FNV-1a over the hyphenated id string.
/// Every client computes the same colour for the same user.
pub fn user_color(user_id: Uuid) -> &'static str {
    let hash = user_id
        .to_string()
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ b as u32).wrapping_mul(FNV_PRIME));
    PALETTE[hash as usize % PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_is_stable_and_from_palette() {
        let id = Uuid::new_v4();
        assert_eq!(user_color(id), user_color(id));
        assert!(PALETTE.contains(&user_color(id)));
    }

    #[test]
    fn colors_spread_over_the_palette() {
        let used: std::collections::HashSet<_> = (0..200).map(|_| user_color(Uuid::new_v4())).collect();
        assert!(used.len() > 4);
    }
}
