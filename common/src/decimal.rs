//! Decimal text for the page.
//!

/// Format `value` with one decimal place, ties rounding up.
///
/// Non-tied values format from their exact binary value like `{:.1}` does. A tie, where the
/// exact value ends in `...x5` on the second decimal, rounds towards the larger neighbor instead
/// of the even one. Such ties are exactly the odd multiples of `0.25`.
pub fn fixed_1(value: f64) -> String {
    let quarters = value * 4.0;
    if quarters.fract() == 0.0 && quarters % 2.0 != 0.0 {
        return format!("{:.1}", (value * 10.0).ceil() / 10.0);
    }

    format!("{value:.1}")
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn ties_round_up() {
        assert_eq!(fixed_1(81.25), "81.3");
        assert_eq!(fixed_1(6.25), "6.3");
        assert_eq!(fixed_1(12.25), "12.3");
        assert_eq!(fixed_1(0.25), "0.3");
        assert_eq!(fixed_1(12.75), "12.8");
    }

    #[test]
    fn other_values_round_to_nearest() {
        assert_eq!(fixed_1(87.5), "87.5");
        assert_eq!(fixed_1(30.303), "30.3");
        assert_eq!(fixed_1(19.96), "20.0");
        assert_eq!(fixed_1(100.0), "100.0");
        // Stored slightly below 0.35
        assert_eq!(fixed_1(0.35), "0.3");
    }
}
