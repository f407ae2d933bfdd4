/// Interface only — the dashboard/web UI itself is out of scope. A future
/// binary can implement this to observe logins and proxy churn without the
/// core crates depending on whatever serves the UI.
pub trait DashboardHook: Send + Sync {
    fn on_login(&self, run_id: &str, user: &str);
    fn on_proxy_registered(&self, proxy_name: &str);
    fn on_proxy_removed(&self, proxy_name: &str);
}
