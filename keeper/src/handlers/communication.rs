//! Chat and meeting clients: stateless beyond which client and where its window sat

use super::{reuse_or_launch, CaptureOptions, Handler, RestoreContext, RestoreResult};
use crate::classify;
use crate::desktop::LaunchSpec;
use crate::error::Result;
use crate::model::{AppInfo, AppType, ApplicationEntry, CommunicationEntry, WindowRecord};
use crate::outcome::Outcome;
use crate::process::ProcessInfo;

pub struct CommunicationHandler;

impl Handler for CommunicationHandler {
    fn app_type(&self) -> AppType {
        AppType::Communication
    }

    fn capture(
        &self,
        record: &WindowRecord,
        process: &ProcessInfo,
        _options: &CaptureOptions,
    ) -> Result<Outcome<ApplicationEntry>> {
        Ok(Outcome::new(
            ApplicationEntry::Communication(CommunicationEntry {
                app: AppInfo::from_record(record, process.exe.clone()),
                kind: classify::communication_kind(&record.process_name, &record.title),
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
