//! Edit distance between a failed and a correct password.

/// Levenshtein distance over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            cur[j + 1] = substitution.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Whether `submitted` is within `max_distance` edits of `correct`.
pub fn is_typo_of(submitted: &str, correct: &str, max_distance: usize) -> bool {
    // Lengths alone bound the distance from below.
    let (la, lb) = (submitted.chars().count(), correct.chars().count());
    if la.abs_diff(lb) > max_distance {
        return false;
    }
    edit_distance(submitted, correct) <= max_distance
}
