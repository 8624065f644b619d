// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::net::Ipv4Addr;

fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
}

#[test]
fn window_admits_up_to_max() {
    let mut window = RateWindow::new(Duration::from_secs(60), 3);
    let now = Instant::now();
    assert!(window.try_hit(now));
    assert!(window.try_hit(now));
    assert!(window.try_hit(now));
    assert!(!window.try_hit(now));
}

#[test]
fn window_boundary_readmits() {
    let mut window = RateWindow::new(Duration::from_millis(100), 1);
    let start = Instant::now();
    assert!(window.try_hit(start));
    assert!(!window.try_hit(start + Duration::from_millis(50)));
    // First hit of the next window is admitted.
    assert!(window.try_hit(start + Duration::from_millis(100)));
}

#[test]
fn upgrade_quota_is_per_ip() {
    let quotas = QuotaMap::new(Duration::from_secs(60), 2);
    assert!(quotas.allow_upgrade(ip(1)));
    assert!(quotas.allow_upgrade(ip(1)));
    assert!(!quotas.allow_upgrade(ip(1)));
    // A different IP has its own window.
    assert!(quotas.allow_upgrade(ip(2)));
}

#[test]
fn active_counters_track_inc_dec() {
    let quotas = QuotaMap::new(Duration::from_secs(60), 10);
    assert_eq!(quotas.active_count(ip(1)), 0);
    quotas.inc_active(ip(1));
    quotas.inc_active(ip(1));
    assert_eq!(quotas.active_count(ip(1)), 2);
    quotas.dec_active(ip(1));
    assert_eq!(quotas.active_count(ip(1)), 1);
    quotas.dec_active(ip(1));
    assert_eq!(quotas.active_count(ip(1)), 0);
    // Underflow is saturating.
    quotas.dec_active(ip(1));
    assert_eq!(quotas.active_count(ip(1)), 0);
}

#[test]
fn reset_zeroes_an_ip() {
    let quotas = QuotaMap::new(Duration::from_secs(60), 10);
    quotas.inc_active(ip(7));
    quotas.inc_active(ip(7));
    quotas.reset_active(ip(7));
    assert_eq!(quotas.active_count(ip(7)), 0);
}
