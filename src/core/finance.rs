use super::types::YearMonth;

pub fn pct_to_decimal(pct: f64) -> f64 {
    if pct.is_finite() { pct / 100.0 } else { 0.0 }
}

/// Monthly rate that compounds to `annual` over twelve months.
pub fn annual_to_monthly_rate(annual: f64) -> f64 {
    (1.0 + annual).powf(1.0 / 12.0) - 1.0
}

/// Level monthly payment that retires `principal` over `term_months` at `annual_rate / 12`.
///
/// A zero rate falls back to straight-line repayment; a missing loan or term pays nothing.
pub fn amortizing_payment(principal: f64, annual_rate: f64, term_months: u32) -> f64 {
    if term_months == 0 || principal <= 0.0 {
        return 0.0;
    }

    let r = annual_rate / 12.0;
    if r == 0.0 {
        return principal / term_months as f64;
    }

    principal * (r / (1.0 - (1.0 + r).powf(-f64::from(term_months))))
}

pub fn months_between(start: YearMonth, end: YearMonth) -> i64 {
    (end.year as i64 - start.year as i64) * 12 + (end.month as i64 - start.month as i64)
}

pub fn years_between(start: YearMonth, end: YearMonth) -> f64 {
    (months_between(start, end) as f64 / 12.0).max(0.0)
}
