use thiserror::Error;

use super::finance::{months_between, years_between};
use super::types::{
    DerivedFacts, Inputs, MAX_HORIZON_YEARS, RequiredInputs, SimulationConfig, YearMonth,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },
    #[error("{field} must be > 0")]
    NotPositive { field: &'static str },
    #[error("{field} must be >= 0")]
    Negative { field: &'static str },
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
    #[error("{field} is not a valid month (got {value})")]
    InvalidMonth {
        field: &'static str,
        value: YearMonth,
    },
    #[error("Move-in date must not be in the future")]
    MoveInInFuture,
    #[error("Move-out date must not be before move-in date")]
    MoveOutBeforeMoveIn,
    #[error("Loan end date must be in the future (at least 1 month from now)")]
    LoanEndNotInFuture,
    #[error("Horizon must be between 1 and {max} years")]
    HorizonOutOfRange { max: u32 },
    #[error("Refinance term must be at least 1 year")]
    RefinanceTermTooShort,
}

/// Every rule a run failed, reported together.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

/// Loan payoff and residency figures relative to `today`.
pub fn derive_facts(required: &RequiredInputs, today: YearMonth) -> DerivedFacts {
    let months_remaining = months_between(today, required.loan_end).max(1);
    let years_resided = if required.moved_in.is_valid() {
        let until = required.moved_out.filter(|m| m.is_valid()).unwrap_or(today);
        Some(years_between(required.moved_in, until))
    } else {
        None
    };

    DerivedFacts {
        months_remaining: u32::try_from(months_remaining).unwrap_or(u32::MAX),
        years_resided,
    }
}

pub fn validate(
    inputs: &Inputs,
    config: &SimulationConfig,
    today: YearMonth,
) -> Result<DerivedFacts, ValidationErrors> {
    let mut checks = Checks::default();
    let req = &inputs.required;
    let opt = &inputs.optional;

    checks.positive("Home value", req.home_value);
    checks.non_negative("Remaining loan balance", req.loan_balance);
    checks.non_negative("Current interest rate", req.loan_rate);
    checks.non_negative("Estimated monthly rent", req.monthly_rent);
    checks.non_negative("Monthly property taxes", req.property_tax_monthly);
    checks.non_negative("Monthly insurance", req.insurance_monthly);

    let moved_in_ok = checks.month("Month/year moved in", req.moved_in);
    let moved_out_ok = req
        .moved_out
        .map(|m| checks.month("Month/year moved out", m))
        .unwrap_or(true);
    let loan_end_ok = checks.month("Month/year loan ends", req.loan_end);

    if moved_in_ok {
        if months_between(req.moved_in, today) < 0 {
            checks.push(ValidationError::MoveInInFuture);
        }
        if let Some(out) = req.moved_out {
            if moved_out_ok && months_between(req.moved_in, out) < 0 {
                checks.push(ValidationError::MoveOutBeforeMoveIn);
            }
        }
    }
    if loan_end_ok && months_between(today, req.loan_end) < 1 {
        checks.push(ValidationError::LoanEndNotInFuture);
    }

    checks.growth_rate("Market return", opt.market_return);
    checks.growth_rate("Home appreciation", opt.home_appreciation);
    checks.growth_rate("Inflation", opt.inflation);
    checks.fraction("Sale closing cost", opt.sale_closing_cost_rate);
    checks.fraction("Vacancy", opt.rental_costs.vacancy);
    checks.fraction("Maintenance", opt.rental_costs.maintenance);
    checks.fraction("CapEx", opt.rental_costs.capex);
    checks.fraction("Property management", opt.rental_costs.management);
    checks.fraction("Rental income tax rate", opt.rental_tax_rate);
    checks.fraction("Capital gains tax rate", opt.capital_gains_rate);
    checks.fraction("Withdrawal rate", opt.withdrawal_rate);
    if let Some(basis) = opt.cost_basis {
        checks.non_negative("Cost basis", basis);
    }
    if let Some(payment) = opt.override_payment {
        checks.positive("Override P&I", payment);
    }

    if config.horizon_years == 0 || config.horizon_years > MAX_HORIZON_YEARS {
        checks.push(ValidationError::HorizonOutOfRange {
            max: MAX_HORIZON_YEARS,
        });
    }

    if config.include_refinance {
        let refi = &opt.refinance;
        checks.non_negative("Refinance rate", refi.annual_rate);
        checks.fraction("Refinance closing cost", refi.closing_cost_rate);
        checks.non_negative("Refinance cash-in", refi.cash_in);
        if refi.term_years == 0 {
            checks.push(ValidationError::RefinanceTermTooShort);
        }
    }

    checks.finish()?;
    Ok(derive_facts(req, today))
}

#[derive(Default)]
struct Checks {
    errors: Vec<ValidationError>,
}

impl Checks {
    fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    fn finite(&mut self, field: &'static str, value: f64) -> bool {
        if value.is_finite() {
            return true;
        }
        self.push(ValidationError::NonFinite { field });
        false
    }

    fn positive(&mut self, field: &'static str, value: f64) {
        if self.finite(field, value) && value <= 0.0 {
            self.push(ValidationError::NotPositive { field });
        }
    }

    fn non_negative(&mut self, field: &'static str, value: f64) {
        if self.finite(field, value) && value < 0.0 {
            self.push(ValidationError::Negative { field });
        }
    }

    fn fraction(&mut self, field: &'static str, value: f64) {
        if self.finite(field, value) && !(0.0..=1.0).contains(&value) {
            self.push(ValidationError::OutOfRange {
                field,
                min: 0.0,
                max: 1.0,
            });
        }
    }

    fn growth_rate(&mut self, field: &'static str, value: f64) {
        if self.finite(field, value) && value <= -1.0 {
            self.push(ValidationError::OutOfRange {
                field,
                min: -1.0,
                max: f64::INFINITY,
            });
        }
    }

    fn month(&mut self, field: &'static str, value: YearMonth) -> bool {
        if value.is_valid() {
            return true;
        }
        self.push(ValidationError::InvalidMonth { field, value });
        false
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}
