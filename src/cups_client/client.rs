use std::{collections::HashMap, io::Cursor};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::DateTime;
use ipp::{model::StatusCode, prelude::*};
use log::{debug, info, warn};
use snafu::{OptionExt, ResultExt};
use url::Url;

use crate::{
    backend::{BackendKind, DriverJobId, DriverJobStatus, PrintBackend, PrintPayload, PrinterInfo, Submission, SubmittedJob},
    config::models::Cups,
    error::{DriverRejectedSnafu, DriverSnafu, FileNotFoundSnafu, InvalidConfigurationSnafu, InvalidParametersSnafu, IoSnafu, PrintError},
};

use super::models::{clean_state_reasons, printer_state_from_ipp, CupsJobState};

const MAX_REQUEST_ATTEMPTS: usize = 3;

pub fn build_cups_url(cups_settings: &Cups, queue_id: Option<&str>) -> Result<String, PrintError> {
    let invalid = |message: String| InvalidConfigurationSnafu { message }.build();

    let mut cups_url = Url::parse(&cups_settings.uri).map_err(|e| invalid(format!("Invalid CUPS uri '{}': {e}", cups_settings.uri)))?;
    if !cups_settings.username.is_empty() && !cups_settings.password.is_empty() {
        cups_url.set_username(&cups_settings.username).map_err(|_| invalid("CUPS uri cannot carry a username".to_string()))?;
        cups_url.set_password(Some(&cups_settings.password)).map_err(|_| invalid("CUPS uri cannot carry a password".to_string()))?;
    }

    Ok(match queue_id {
        Some(queue_id) => cups_url
            .join("printers/")
            .and_then(|printers| printers.join(queue_id))
            .map_err(|e| invalid(format!("Invalid print queue name '{queue_id}': {e}")))?,
        None => cups_url,
    }
    .to_string())
}

fn parse_uri(uri: &str) -> Result<Uri, PrintError> {
    uri.parse().map_err(|e| InvalidParametersSnafu { message: format!("Invalid printer uri '{uri}': {e}") }.build())
}

/// The real driver: a CUPS server spoken to over IPP.
pub struct CupsClient {
    settings: Cups,
}

impl CupsClient {
    pub fn new(settings: Cups) -> Result<Self, PrintError> {
        // Fail early on a malformed server address.
        build_cups_url(&settings, None)?;
        info!("Using CUPS server at {}", settings.uri);
        Ok(CupsClient { settings })
    }

    fn client(&self, uri: Uri) -> AsyncIppClient {
        AsyncIppClient::builder(uri).ignore_tls_errors(self.settings.ignore_tls_errors).build()
    }

    /// Send an IPP request to do `op` to the given `uri` and get the response.
    ///
    /// Read-only requests are retried with exponential backoff; `job_id` adds a
    /// `job-id` operation attribute for job-level operations.
    async fn send_ipp_request(&self, uri: &str, op: Operation, job_id: Option<i32>) -> Result<IppRequestResponse, PrintError> {
        let uri_p = parse_uri(uri)?;
        let operation = format!("{op:?}");

        let send = || async {
            let mut req = IppRequestResponse::new(IppVersion::v1_1(), op, Some(uri_p.clone()));
            if let Some(job_id) = job_id {
                req.attributes_mut().add(
                    DelimiterTag::OperationAttributes,
                    IppAttribute::new(IppAttribute::JOB_ID, IppValue::Integer(job_id)),
                );
            }
            self.client(uri_p.clone()).send(req).await.context(DriverSnafu { operation: operation.as_str() })
        };

        send.retry(ExponentialBuilder::default().with_max_times(MAX_REQUEST_ATTEMPTS - 1))
            .notify(|err, delay| warn!("{err}, retrying in {delay:?}"))
            .await
    }

    fn ensure_success(response: &IppRequestResponse, operation: &str) -> Result<(), PrintError> {
        let status = response.header().status_code();
        if status.is_success() {
            return Ok(());
        }
        DriverRejectedSnafu { operation, status: format!("{status:?}") }.fail()
    }

    async fn get_default_printer_name(&self) -> Option<String> {
        let url = build_cups_url(&self.settings, None).ok()?;
        let resp = match self.send_ipp_request(&url, Operation::CupsGetDefault, None).await {
            Ok(resp) => resp,
            Err(err) => {
                debug!("Could not determine the default printer: {err}");
                return None;
            }
        };
        let group = resp.attributes().groups_of(DelimiterTag::PrinterAttributes).next()?;
        group.attributes().get("printer-name").map(|name| name.value().to_string())
    }

    pub async fn get_printers(&self) -> Result<Vec<PrinterInfo>, PrintError> {
        let url = build_cups_url(&self.settings, None)?;
        let resp = self.send_ipp_request(&url, Operation::CupsGetPrinters, None).await?;
        Self::ensure_success(&resp, "CUPS-Get-Printers")?;

        let default_name = self.get_default_printer_name().await;
        let printers = resp
            .attributes()
            .groups_of(DelimiterTag::PrinterAttributes)
            .filter_map(|printer| printer_from_attributes(printer.attributes(), default_name.as_deref()))
            .collect();
        Ok(printers)
    }

    async fn get_job_state(&self, printer_name: &str, job_id: i32) -> Result<Option<CupsJobState>, PrintError> {
        let url = build_cups_url(&self.settings, Some(printer_name))?;
        let resp = self.send_ipp_request(&url, Operation::GetJobAttributes, Some(job_id)).await?;
        if resp.header().status_code() == StatusCode::ClientErrorNotFound {
            return Ok(None);
        }
        Self::ensure_success(&resp, "Get-Job-Attributes")?;

        let Some(group) = resp.attributes().groups_of(DelimiterTag::JobAttributes).next() else {
            return Ok(None);
        };
        let attributes = group.attributes();

        let raw_state = attributes.get("job-state").map(|state| state.value().to_string()).unwrap_or_default();
        let state = attributes
            .get("job-state")
            .and_then(|state| state.value().as_enum())
            .and_then(|v| JobState::from_i32(*v));
        let created = attributes
            .get("time-at-creation")
            .and_then(|created| created.value().as_integer())
            .and_then(|secs| DateTime::from_timestamp(i64::from(*secs), 0));

        // Not every job seems to have a name
        let name = attributes.get("job-name").map(|name| name.value().to_string()).unwrap_or_default();
        let reason = attributes.get("job-state-reasons").map(|reasons| values_of(reasons.value()).join(",")).unwrap_or_default();

        Ok(Some(CupsJobState { name, id: job_id, state, raw_state, reason, created }))
    }
}

#[async_trait]
impl PrintBackend for CupsClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Cups
    }

    async fn list_printers(&self) -> Result<Vec<PrinterInfo>, PrintError> {
        self.get_printers().await
    }

    async fn submit(&self, printer_name: &str, payload: PrintPayload, submission: &Submission) -> Result<SubmittedJob, PrintError> {
        let data = match payload {
            PrintPayload::File(path) => match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return FileNotFoundSnafu { path }.fail(),
                Err(err) => return Err(err).context(IoSnafu { path }),
            },
            PrintPayload::Bytes(data) => data,
        };
        let size_bytes = data.len() as u64;

        let uri_p = parse_uri(&build_cups_url(&self.settings, Some(printer_name))?)?;
        let mut print_job = IppOperationBuilder::print_job(uri_p.clone(), IppPayload::new(Cursor::new(data)))
            .job_title(&submission.name)
            .document_format(&submission.media_type);
        for (name, value) in &submission.properties {
            print_job = print_job.attribute(IppAttribute::new(name, property_value(value)));
        }

        // Print-Job is not idempotent, so it is sent exactly once.
        let resp = self.client(uri_p).send(print_job.build()).await.context(DriverSnafu { operation: "Print-Job" })?;
        Self::ensure_success(&resp, "Print-Job")?;

        let driver_job_id = resp
            .attributes()
            .groups_of(DelimiterTag::JobAttributes)
            .find_map(|group| group.attributes().get(IppAttribute::JOB_ID).and_then(|id| id.value().as_integer().copied()))
            .context(DriverRejectedSnafu { operation: "Print-Job", status: "response without job-id" })?;

        info!("CUPS accepted '{}' on '{printer_name}' as job {driver_job_id} ({size_bytes} bytes)", submission.name);
        Ok(SubmittedJob { driver_job_id, size_bytes })
    }

    async fn query_job_status(&self, printer_name: &str, job: DriverJobId) -> Result<Option<DriverJobStatus>, PrintError> {
        Ok(self.get_job_state(printer_name, job).await?.as_ref().map(DriverJobStatus::from))
    }
}

fn values_of(value: &IppValue) -> Vec<String> {
    match value {
        IppValue::Array(values) => values.iter().map(|value| value.to_string()).collect(),
        value => vec![value.to_string()],
    }
}

fn property_value(value: &str) -> IppValue {
    match value.parse::<i32>() {
        Ok(number) => IppValue::Integer(number),
        Err(_) => IppValue::Keyword(value.into()),
    }
}

fn printer_from_attributes(attributes: &HashMap<String, IppAttribute>, default_name: Option<&str>) -> Option<PrinterInfo> {
    let text = |name: &str| attributes.get(name).map(|attribute| attribute.value().to_string()).unwrap_or_default();

    let name = text("printer-name");
    if name.is_empty() {
        return None;
    }

    let state = attributes
        .get("printer-state")
        .and_then(|state| state.value().as_enum())
        .and_then(|v| PrinterState::from_i32(*v));
    let state_reasons = attributes.get("printer-state-reasons").map(|reasons| values_of(reasons.value())).unwrap_or_default();
    let is_shared = matches!(attributes.get("printer-is-shared").map(|shared| shared.value()), Some(IppValue::Boolean(true)));

    Some(PrinterInfo {
        is_default: default_name == Some(name.as_str()),
        system_name: name.clone(),
        name,
        driver_name: text("printer-make-and-model"),
        uri: text("printer-uri-supported"),
        port_name: text("device-uri"),
        processor: "CUPS".to_string(),
        data_type: text("document-format-default"),
        description: text("printer-info"),
        location: text("printer-location"),
        is_shared,
        state: printer_state_from_ipp(state),
        state_reasons: clean_state_reasons(state_reasons),
    })
}
