use warden_core::Tier;
use warden_core::request::parse_amount;

use crate::rules::SpendingLimitRules;

/// Band an amount against ordered thresholds. Missing thresholds are skipped;
/// anything above every present threshold is APPROVAL.
fn band<T: PartialOrd + Copy>(amount: T, instant: Option<T>, notify: Option<T>, delay: Option<T>) -> Tier {
    let bands = [
        (instant, Tier::Instant),
        (notify, Tier::Notify),
        (delay, Tier::Delay),
    ];
    for (max, tier) in bands {
        if max.is_some_and(|m| amount <= m) {
            return tier;
        }
    }
    Tier::Approval
}

/// Tier for a native amount. Zero moves nothing and is always INSTANT, as is
/// any amount when no native threshold is configured.
pub fn native_tier(amount: u128, rules: &SpendingLimitRules) -> Tier {
    let parse = |v: &Option<String>| v.as_deref().and_then(|s| parse_amount(s).ok());
    let (instant, notify, delay) = (
        parse(&rules.instant_max),
        parse(&rules.notify_max),
        parse(&rules.delay_max),
    );
    if amount == 0 || (instant.is_none() && notify.is_none() && delay.is_none()) {
        return Tier::Instant;
    }
    band(amount, instant, notify, delay)
}

/// Tier for a USD value, or `None` when no USD threshold is configured.
pub fn usd_tier(usd: f64, rules: &SpendingLimitRules) -> Option<Tier> {
    if !rules.has_usd_thresholds() {
        return None;
    }
    Some(band(
        usd,
        rules.instant_max_usd,
        rules.notify_max_usd,
        rules.delay_max_usd,
    ))
}

/// Per-transaction tier: the stricter of the native and USD tiers.
pub fn per_tx_tier(native_amount: u128, usd: Option<f64>, rules: &SpendingLimitRules) -> Tier {
    let native = native_tier(native_amount, rules);
    match usd.filter(|u| *u > 0.0).and_then(|u| usd_tier(u, rules)) {
        Some(usd) => native.max(usd),
        None => native,
    }
}
