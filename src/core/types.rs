use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_HORIZON_YEARS: u32 = 30;
pub const MAX_HORIZON_YEARS: u32 = 50;

/// A calendar month, `month` in `1..=12` once validated.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub const fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn is_valid(self) -> bool {
        (1..=12).contains(&self.month)
    }
}

impl From<NaiveDate> for YearMonth {
    fn from(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("expected a YYYY-MM month, got {0:?}")]
pub struct ParseYearMonthError(pub String);

impl FromStr for YearMonth {
    type Err = ParseYearMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = || ParseYearMonthError(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(fail)?;
        let year = year.parse::<i32>().map_err(|_| fail())?;
        let month = month.parse::<u32>().map_err(|_| fail())?;
        let ym = Self::new(year, month);
        if ym.is_valid() { Ok(ym) } else { Err(fail()) }
    }
}

/// Household facts every run needs. Rates are fractions (0.06 = 6%).
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredInputs {
    pub home_value: f64,
    pub loan_balance: f64,
    pub loan_rate: f64,
    pub monthly_rent: f64,
    pub property_tax_monthly: f64,
    pub insurance_monthly: f64,
    pub moved_in: YearMonth,
    /// `None` while still living in the home.
    pub moved_out: Option<YearMonth>,
    pub loan_end: YearMonth,
}

/// Landlord operating costs, each a fraction of gross rent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RentalCosts {
    pub vacancy: f64,
    pub maintenance: f64,
    pub capex: f64,
    pub management: f64,
}

impl RentalCosts {
    pub fn total(self) -> f64 {
        self.vacancy + self.maintenance + self.capex + self.management
    }
}

impl Default for RentalCosts {
    fn default() -> Self {
        Self {
            vacancy: 0.05,
            maintenance: 0.05,
            capex: 0.05,
            management: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinanceTerms {
    pub annual_rate: f64,
    pub term_years: u32,
    /// Charged on the balance left after the cash-in paydown.
    pub closing_cost_rate: f64,
    pub cash_in: f64,
}

impl Default for RefinanceTerms {
    fn default() -> Self {
        Self {
            annual_rate: 0.055,
            term_years: 30,
            closing_cost_rate: 0.02,
            cash_in: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionalAssumptions {
    pub market_return: f64,
    pub home_appreciation: f64,
    pub inflation: f64,
    pub sale_closing_cost_rate: f64,
    pub rental_costs: RentalCosts,
    pub rental_tax_rate: f64,
    pub capital_gains_rate: f64,
    pub cost_basis: Option<f64>,
    /// Replaces the computed P&I in cash-flow accounting only.
    pub override_payment: Option<f64>,
    pub withdrawal_rate: f64,
    pub refinance: RefinanceTerms,
}

impl Default for OptionalAssumptions {
    fn default() -> Self {
        Self {
            market_return: 0.07,
            home_appreciation: 0.03,
            inflation: 0.03,
            sale_closing_cost_rate: 0.06,
            rental_costs: RentalCosts::default(),
            rental_tax_rate: 0.0,
            capital_gains_rate: 0.15,
            cost_basis: None,
            override_payment: None,
            withdrawal_rate: 0.04,
            refinance: RefinanceTerms::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inputs {
    pub required: RequiredInputs,
    pub optional: OptionalAssumptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationConfig {
    pub horizon_years: u32,
    pub include_refinance: bool,
    /// Credit the renting scenario's shortfalls to the Sell scenario's investments.
    pub credit_avoided_cash_flow: bool,
    pub report_income_potential: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            horizon_years: DEFAULT_HORIZON_YEARS,
            include_refinance: false,
            credit_avoided_cash_flow: false,
            report_income_potential: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFacts {
    pub months_remaining: u32,
    pub years_resided: Option<f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    Sell,
    Rent,
    RentRefi,
}

impl Scenario {
    pub fn label(self) -> &'static str {
        match self {
            Scenario::Sell => "SELL",
            Scenario::Rent => "RENT",
            Scenario::RentRefi => "RENT_REFI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomePotential {
    pub withdrawal_income: f64,
    pub rental_income: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioYear {
    pub scenario: Scenario,
    pub net_worth: f64,
    /// Liquid investments net of out-of-pocket drag.
    pub stocks: f64,
    pub home_equity: f64,
    /// After-tax rental cash flow realized during the year.
    pub rental_income: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub income_potential: Option<IncomePotential>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRow {
    pub year: u32,
    pub scenarios: Vec<ScenarioYear>,
}

impl YearRow {
    pub fn get(&self, scenario: Scenario) -> Option<&ScenarioYear> {
        self.scenarios.iter().find(|s| s.scenario == scenario)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum CapitalGainsRule {
    ResidencyExclusion,
    NoCostBasis,
    Taxable { rate: f64 },
}

impl CapitalGainsRule {
    pub fn explanation(self) -> String {
        match self {
            CapitalGainsRule::ResidencyExclusion => "Sale tax: assumed 0% capital gains tax because time in home is at least 2 years (simplified rule).".to_string(),
            CapitalGainsRule::NoCostBasis => "Sale tax: time in home is under 2 years, but no cost basis was given, so no capital gain is assumed (simplified rule).".to_string(),
            CapitalGainsRule::Taxable { rate } => format!(
                "Sale tax: time in home is under 2 years, so {:.1}% applies to (sale price - cost basis).",
                rate * 100.0
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleOutcome {
    pub sale_price: f64,
    pub closing_costs: f64,
    pub capital_gains_tax: f64,
    pub loan_payoff: f64,
    /// Negative when the sale does not cover the loan; carried as drag.
    pub net_proceeds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinanceMeta {
    pub payment: f64,
    pub paydown: f64,
    pub closing_costs: f64,
    pub upfront_cost: f64,
    pub breakeven_months: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationMeta {
    pub horizon_years: u32,
    pub months_remaining: u32,
    pub years_resided: Option<f64>,
    pub computed_payment: f64,
    pub cash_flow_payment: f64,
    pub payment_overridden: bool,
    pub baseline_net_worth: f64,
    pub sale: SaleOutcome,
    pub sell_transaction_hit: f64,
    pub capital_gains_rule: CapitalGainsRule,
    pub tax_line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinance: Option<RefinanceMeta>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RankMetric {
    NetWorth,
    IncomePotential,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub years: Vec<YearRow>,
    pub meta: SimulationMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_parses_and_displays_padded() {
        let ym: YearMonth = " 2024-03 ".parse().expect("valid month");
        assert_eq!(ym, YearMonth::new(2024, 3));
        assert_eq!(ym.to_string(), "2024-03");
        assert_eq!("2024-3".parse::<YearMonth>(), Ok(YearMonth::new(2024, 3)));
    }

    #[test]
    fn year_month_rejects_malformed_input() {
        for bad in ["2024", "2024-13", "2024-00", "March 2024", "2024-03-01", ""] {
            assert!(bad.parse::<YearMonth>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn year_month_from_date_drops_the_day() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).expect("valid date");
        assert_eq!(YearMonth::from(date), YearMonth::new(2026, 10));
    }

    #[test]
    fn rental_cost_total_sums_every_fraction() {
        let costs = RentalCosts {
            management: 0.08,
            ..RentalCosts::default()
        };
        assert!((costs.total() - 0.23).abs() < 1e-12);
    }
}
