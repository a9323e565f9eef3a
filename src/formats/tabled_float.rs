use std::fmt;

/// Renders a value in a fixed width of 7 characters for the live table.
///
/// Magnitudes between 0.01 and 999 are printed with three decimals, others get an
/// SI prefix (`p` to `T`) and one decimal. Beyond the prefixes scientific notation is used,
/// below them the value is shown as `0`. NaN, which marks a missing value, is shown as `-`.
pub struct TabledFloat(pub f64);

const BIG: [&str; 4] = ["k", "M", "G", "T"];
const SMALL: [&str; 4] = ["m", "µ", "n", "p"];

impl fmt::Display for TabledFloat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = self.0;
        if x.is_nan() {
            return write!(f, "{:>7}", "-");
        }
        if !x.is_finite() || x.is_sign_negative() {
            return write!(f, "{x:7.0e}");
        }
        let decade = x.log10().floor() as i32;
        if (-2..=2).contains(&decade) {
            return write!(f, "{x:7.3}");
        }
        let group = decade.div_euclid(3);
        let prefix = if group > 0 {
            BIG.get(group as usize - 1)
        } else {
            SMALL.get(group.unsigned_abs() as usize - 1)
        };
        match prefix {
            Some(prefix) => write!(f, "{:5.1} {prefix}", x / 1000f64.powi(group)),
            None if group > 0 => write!(f, "{x:7e}"),
            None => write!(f, "{:>7}", 0),
        }
    }
}

#[test]
fn test_tabled_float() {
    let cases = [
        (1e-20, "      0"),
        (2.5e-9, "  2.5 n"),
        (1e-6, "  1.0 µ"),
        (5e-4, "500.0 µ"),
        (1e-3, "  1.0 m"),
        (1e-2, "  0.010"),
        (1.0, "  1.000"),
        (123.456, "123.456"),
        (1e+3, "  1.0 k"),
        (3.2e9, "  3.2 G"),
        (5e+42, "   5e42"),
        (f64::NAN, "      -"),
    ];
    for (x, expected) in cases {
        assert_eq!(TabledFloat(x).to_string(), expected, "{x}");
    }
}

#[test]
fn test_tabled_float_width() {
    use rand::Rng;
    let mut rng = rand::rng();
    let specials = [f64::INFINITY, f64::NEG_INFINITY, 0.0, -0.0, f64::EPSILON / 4.0];
    let random =
        (0..200).map(|_| 10f64.powi(rng.random_range(-15..15)) * rng.random_range(1.0..9.0));
    for x in specials.into_iter().chain(random) {
        assert_eq!(TabledFloat(x).to_string().chars().count(), 7, "{x}");
    }
}
