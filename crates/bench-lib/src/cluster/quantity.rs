//! Kubernetes resource quantity parsing
//!
//! Handles the subset of quantity syntax that node allocatables and pod
//! requests actually use: plain decimals, the `m` cpu suffix, and binary or
//! decimal byte suffixes. Unparseable values read as zero rather than
//! failing a whole snapshot.

/// CPU quantity in millicores: `"2"` -> 2000, `"150m"` -> 150, `"0.5"` -> 500.
pub fn cpu_milli(value: &str) -> i64 {
    let value = value.trim();
    if let Some(milli) = value.strip_suffix('m') {
        return milli.parse::<i64>().unwrap_or(0);
    }
    match value.parse::<f64>() {
        Ok(cores) => (cores * 1000.0).round() as i64,
        Err(_) => 0,
    }
}

/// Memory quantity in bytes: `"128Mi"`, `"1Gi"`, `"500M"`, `"1048576"`.
pub fn mem_bytes(value: &str) -> i64 {
    let value = value.trim();
    let (digits, multiplier) = split_suffix(value);
    match digits.parse::<f64>() {
        Ok(n) => (n * multiplier as f64).round() as i64,
        Err(_) => 0,
    }
}

fn split_suffix(value: &str) -> (&str, i64) {
    const SUFFIXES: [(&str, i64); 10] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
    ];
    for (suffix, multiplier) in SUFFIXES {
        if let Some(digits) = value.strip_suffix(suffix) {
            return (digits, multiplier);
        }
    }
    (value, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_parses_cores_and_millicores() {
        assert_eq!(cpu_milli("2"), 2000);
        assert_eq!(cpu_milli("150m"), 150);
        assert_eq!(cpu_milli("0.5"), 500);
        assert_eq!(cpu_milli("garbage"), 0);
    }

    #[test]
    fn memory_parses_binary_and_decimal_suffixes() {
        assert_eq!(mem_bytes("128Mi"), 128 * 1024 * 1024);
        assert_eq!(mem_bytes("1Gi"), 1 << 30);
        assert_eq!(mem_bytes("500M"), 500_000_000);
        assert_eq!(mem_bytes("1048576"), 1_048_576);
        assert_eq!(mem_bytes(""), 0);
    }
}
