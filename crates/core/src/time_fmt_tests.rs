// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{format_elapsed, format_secs_1dp};

#[yare::parameterized(
    zero_seconds     = { 0,      "0s" },
    max_seconds      = { 59,     "59s" },
    one_minute       = { 60,     "1m" },
    max_minutes      = { 3599,   "59m" },
    one_hour         = { 3600,   "1h" },
    hour_and_minutes = { 3660,   "1h1m" },
    hours_no_minutes = { 7200,   "2h" },
    one_day          = { 86400,  "1d" },
)]
fn elapsed(secs: u64, expected: &str) {
    assert_eq!(format_elapsed(secs), expected);
}

#[yare::parameterized(
    sub_second   = { 300,    "0.3s" },
    one_and_half = { 1_500,  "1.5s" },
    exact        = { 2_000,  "2.0s" },
    truncates    = { 1_990,  "1.9s" },
)]
fn secs_1dp(ms: u64, expected: &str) {
    assert_eq!(format_secs_1dp(ms), expected);
}
