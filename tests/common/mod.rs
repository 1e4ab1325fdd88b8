//! Scripted in-memory B2 service shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use b2lift::api::{
    ApiError, ApiResult, B2Api, LargeFile, TransportFault, UploadCredential, UploadFileRequest,
    UploadPartRequest,
};
use b2lift::upload::hash_stream;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub const MB: usize = 1_000_000;

/// A failure the mock returns instead of performing a request
#[derive(Debug, Clone)]
pub enum Fault {
    Status(u16, &'static str),
    RetryAfter(u16, Duration),
    Transport(TransportFault),
}

impl Fault {
    fn into_error(self, url: &str) -> ApiError {
        match self {
            Fault::Status(status, message) => ApiError::status(url, status, None, message),
            Fault::RetryAfter(status, delay) => {
                ApiError::status(url, status, None, "try again later").with_retry_after(delay)
            }
            Fault::Transport(fault) => ApiError::transport(url, fault),
        }
    }
}

/// One received upload, standard or part
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedUpload {
    pub upload_url: String,
    pub part_number: Option<u32>,
    pub content_length: u64,
    pub content_sha1: String,
    /// SHA-1 of the body actually streamed
    pub body_sha1: String,
    pub body_len: u64,
}

#[derive(Default)]
struct State {
    authorizations: u32,
    issued: u32,
    upload_attempts: u32,
    uploads: Vec<ReceivedUpload>,
    completion_order: Vec<u32>,
    started: Vec<String>,
    finished: Vec<(String, Vec<String>)>,
    cancelled: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Default)]
pub struct MockB2Api {
    state: Mutex<State>,
    upload_faults: Mutex<VecDeque<Fault>>,
    part_faults: Mutex<HashMap<u32, VecDeque<Fault>>>,
    part_delays: Mutex<HashMap<u32, Duration>>,
    cancel_fault: Mutex<Option<Fault>>,
    start_fault: Mutex<Option<Fault>>,
    finish_fault: Mutex<Option<Fault>>,
}

impl MockB2Api {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next upload requests, in order, before succeeding
    pub fn fail_uploads(&self, faults: impl IntoIterator<Item = Fault>) {
        self.upload_faults.lock().unwrap().extend(faults);
    }

    /// Fail attempts at one part number, in order, before succeeding
    pub fn fail_part(&self, part_number: u32, faults: impl IntoIterator<Item = Fault>) {
        self.part_faults
            .lock()
            .unwrap()
            .entry(part_number)
            .or_default()
            .extend(faults);
    }

    /// Hold the response to a part upload for `delay`
    pub fn delay_part(&self, part_number: u32, delay: Duration) {
        self.part_delays.lock().unwrap().insert(part_number, delay);
    }

    pub fn fail_cancel(&self, fault: Fault) {
        *self.cancel_fault.lock().unwrap() = Some(fault);
    }

    pub fn fail_start(&self, fault: Fault) {
        *self.start_fault.lock().unwrap() = Some(fault);
    }

    pub fn fail_finish(&self, fault: Fault) {
        *self.finish_fault.lock().unwrap() = Some(fault);
    }

    pub fn authorizations(&self) -> u32 {
        self.state.lock().unwrap().authorizations
    }

    /// Credentials handed out through either upload-url call
    pub fn issued(&self) -> u32 {
        self.state.lock().unwrap().issued
    }

    /// Upload requests received, failed ones included
    pub fn upload_attempts(&self) -> u32 {
        self.state.lock().unwrap().upload_attempts
    }

    /// Successful uploads in arrival order
    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// Part numbers in the order their uploads completed
    pub fn completion_order(&self) -> Vec<u32> {
        self.state.lock().unwrap().completion_order.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn finished(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().finished.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn issue(&self, scope: &str) -> UploadCredential {
        let mut state = self.state.lock().unwrap();
        state.issued += 1;
        UploadCredential {
            upload_url: format!("https://pod-{}.mock/{}", state.issued, scope),
            authorization_token: format!("token-{}", state.issued),
        }
    }

    fn begin_upload(&self) {
        let mut state = self.state.lock().unwrap();
        state.upload_attempts += 1;
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
    }

    fn end_upload(&self) {
        self.state.lock().unwrap().in_flight -= 1;
    }

    async fn receive(
        &self,
        credential: &UploadCredential,
        part_number: Option<u32>,
        content_length: u64,
        content_sha1: String,
        body: b2lift::api::ReadStream,
    ) -> ApiResult<ReceivedUpload> {
        let fault = match part_number {
            Some(number) => self
                .part_faults
                .lock()
                .unwrap()
                .get_mut(&number)
                .and_then(VecDeque::pop_front),
            None => None,
        };
        let fault = fault.or_else(|| self.upload_faults.lock().unwrap().pop_front());
        if let Some(fault) = fault {
            return Err(fault.into_error(&credential.upload_url));
        }

        let (body_sha1, body_len) = hash_stream(body).await.map_err(|e| {
            ApiError::transport(&credential.upload_url, TransportFault::Other(e.to_string()))
        })?;

        Ok(ReceivedUpload {
            upload_url: credential.upload_url.clone(),
            part_number,
            content_length,
            content_sha1,
            body_sha1,
            body_len,
        })
    }
}

#[async_trait]
impl B2Api for MockB2Api {
    async fn authorize(&self) -> ApiResult<()> {
        self.state.lock().unwrap().authorizations += 1;
        Ok(())
    }

    async fn get_upload_url(&self, bucket_id: &str) -> ApiResult<UploadCredential> {
        Ok(self.issue(&format!("b2_upload_file/{}", bucket_id)))
    }

    async fn get_upload_part_url(&self, file_id: &str) -> ApiResult<UploadCredential> {
        Ok(self.issue(&format!("b2_upload_part/{}", file_id)))
    }

    async fn start_large_file(
        &self,
        _bucket_id: &str,
        file_name: &str,
        _content_type: &str,
    ) -> ApiResult<LargeFile> {
        if let Some(fault) = self.start_fault.lock().unwrap().take() {
            return Err(fault.into_error("https://api.mock/b2api/v2/b2_start_large_file"));
        }
        let mut state = self.state.lock().unwrap();
        let file_id = format!("large-{}", state.started.len() + 1);
        state.started.push(file_name.to_string());
        Ok(LargeFile { file_id })
    }

    async fn finish_large_file(&self, file_id: &str, part_sha1s: &[String]) -> ApiResult<Value> {
        if let Some(fault) = self.finish_fault.lock().unwrap().take() {
            return Err(fault.into_error("https://api.mock/b2api/v2/b2_finish_large_file"));
        }
        self.state
            .lock()
            .unwrap()
            .finished
            .push((file_id.to_string(), part_sha1s.to_vec()));
        Ok(json!({ "fileId": file_id, "action": "upload", "parts": part_sha1s.len() }))
    }

    async fn cancel_large_file(&self, file_id: &str) -> ApiResult<Value> {
        self.state.lock().unwrap().cancelled.push(file_id.to_string());
        if let Some(fault) = self.cancel_fault.lock().unwrap().take() {
            return Err(fault.into_error("https://api.mock/b2api/v2/b2_cancel_large_file"));
        }
        Ok(json!({ "fileId": file_id }))
    }

    async fn upload_file(
        &self,
        credential: &UploadCredential,
        request: UploadFileRequest,
    ) -> ApiResult<Value> {
        self.begin_upload();
        let received = self
            .receive(
                credential,
                None,
                request.content_length,
                request.content_sha1,
                request.body,
            )
            .await;
        self.end_upload();

        let received = received?;
        let response = json!({
            "fileId": "file-1",
            "fileName": request.file_name,
            "contentType": request.content_type,
            "contentLength": received.body_len,
            "contentSha1": received.body_sha1,
        });
        self.state.lock().unwrap().uploads.push(received);
        Ok(response)
    }

    async fn upload_part(
        &self,
        credential: &UploadCredential,
        request: UploadPartRequest,
    ) -> ApiResult<Value> {
        self.begin_upload();
        let delay = self.part_delays.lock().unwrap().get(&request.part_number).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let number = request.part_number;
        let received = self
            .receive(
                credential,
                Some(number),
                request.content_length,
                request.content_sha1,
                request.body,
            )
            .await;
        self.end_upload();

        let received = received?;
        let response = json!({ "partNumber": number, "contentSha1": received.body_sha1 });
        let mut state = self.state.lock().unwrap();
        state.completion_order.push(number);
        state.uploads.push(received);
        Ok(response)
    }
}

/// Deterministic, non-repeating-per-part test data
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 251 % 256) as u8).collect()
}
