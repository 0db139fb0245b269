/// Colorbar tick label.
///
/// Very large or very small magnitudes use `m.m×10ᵉ`; integers print bare,
/// values of at least 10 get one decimal, values below 0.01 three
/// significant figures and anything else two decimals.
pub fn format_tick(x: f64) -> String {
    if x == 0.0 {
        return "0".to_string();
    }
    if !x.is_finite() {
        return x.to_string();
    }
    let a = x.abs();
    if a >= 1000.0 || a < 0.001 {
        return scientific(x);
    }
    if x.fract() == 0.0 {
        format!("{}", x as i64)
    } else if a >= 10.0 {
        format!("{x:.1}")
    } else if a >= 0.01 {
        format!("{x:.2}")
    } else {
        let decimals = (2 - a.log10().floor() as i32).max(0) as usize;
        let text = format!("{x:.decimals$}");
        text.trim_end_matches('0').to_string()
    }
}

fn scientific(x: f64) -> String {
    let mut exp = x.abs().log10().floor() as i32;
    let mut mantissa = x / 10f64.powi(exp);
    if (mantissa.abs() * 10.0).round() >= 100.0 {
        exp += 1;
        mantissa /= 10.0;
    }
    format!("{mantissa:.1}×10{}", superscript(exp))
}

fn superscript(n: i32) -> String {
    n.to_string()
        .chars()
        .map(|c| match c {
            '-' => '⁻',
            '0' => '⁰',
            '1' => '¹',
            '2' => '²',
            '3' => '³',
            '4' => '⁴',
            '5' => '⁵',
            '6' => '⁶',
            '7' => '⁷',
            '8' => '⁸',
            '9' => '⁹',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values() {
        assert_eq!(format_tick(0.0), "0");
        assert_eq!(format_tick(-300.0), "-300");
        assert_eq!(format_tick(5.0), "5");
        assert_eq!(format_tick(12.345), "12.3");
        assert_eq!(format_tick(-2.5), "-2.50");
        assert_eq!(format_tick(0.0123), "0.01");
    }

    #[test]
    fn scientific_thresholds() {
        assert_eq!(format_tick(1000.0), "1.0×10³");
        assert_eq!(format_tick(-25_000.0), "-2.5×10⁴");
        assert_eq!(format_tick(0.0005), "5.0×10⁻⁴");
        assert_eq!(format_tick(999.0), "999");
        assert_eq!(format_tick(0.001), "0.001");
    }

    #[test]
    fn small_ticks_keep_significant_digits() {
        assert_eq!(format_tick(0.0045), "0.0045");
        assert_eq!(format_tick(-0.00123456), "-0.00123");
        assert_eq!(format_tick(0.005), "0.005");
        assert_ne!(format_tick(0.002), "0.00");
    }

    #[test]
    fn mantissa_rounding_carries_into_exponent() {
        assert_eq!(format_tick(99_990.0), "1.0×10⁵");
    }
}
