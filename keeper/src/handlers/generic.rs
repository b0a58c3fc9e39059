use super::{reuse_or_launch, CaptureOptions, Handler, RestoreContext, RestoreResult};
use crate::desktop::LaunchSpec;
use crate::error::Result;
use crate::model::{AppInfo, AppType, ApplicationEntry, GenericEntry, WindowRecord};
use crate::outcome::Outcome;
use crate::process::ProcessInfo;

/// Fallback: layout plus the executable to relaunch
pub struct GenericHandler;

impl Handler for GenericHandler {
    fn app_type(&self) -> AppType {
        AppType::Generic
    }

    fn capture(
        &self,
        record: &WindowRecord,
        process: &ProcessInfo,
        _options: &CaptureOptions,
    ) -> Result<Outcome<ApplicationEntry>> {
        Ok(Outcome::new(
            ApplicationEntry::Generic(GenericEntry {
                app: AppInfo::from_record(record, process.exe.clone()),
                degraded_from: None,
            }),
            vec![],
        ))
    }

    fn restore(&self, entry: &ApplicationEntry, ctx: &RestoreContext) -> Result<RestoreResult> {
        let app = entry.app();
        let spec = app
            .executable
            .as_ref()
            .map(|exe| LaunchSpec::new(exe.clone(), app.process_name.clone()));
        reuse_or_launch(ctx, entry, spec)
    }
}
