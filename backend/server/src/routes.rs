use std::{collections::BTreeMap, fmt::Write, net::SocketAddr, sync::Arc};

use axum::{
    Form, Json,
    extract::{ConnectInfo, Query, State as AxumState},
    http::{
        HeaderMap,
        header::{ACCEPT_LANGUAGE, REFERER},
    },
    response::{Html, IntoResponse, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::{
    admission::BallotRequest,
    error::{AdmissionError, AppError, DUPLICATE_REDIRECT},
    identity::VoterIdentity,
    state::State,
    utils::{BLANK_CANDIDATE, client_address, client_signature, escape_html, header_string},
};

#[derive(Deserialize)]
pub struct VoteForm {
    #[serde(default)]
    candidate_number: String,
    #[serde(default)]
    latitude: String,
    #[serde(default)]
    longitude: String,
}

#[derive(Deserialize)]
pub struct ResultQuery {
    message: Option<String>,
}

#[derive(Serialize)]
pub struct ResultResponse {
    pub tallies: BTreeMap<i64, u64>,
    pub blank: u64,
    pub total: u64,
}

pub async fn vote_handler(
    AxumState(state): AxumState<Arc<State>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<VoteForm>,
) -> Result<impl IntoResponse, AppError> {
    let identity = VoterIdentity::from_jar(
        &client_address(&headers, peer),
        &client_signature(&headers),
        &jar,
    );
    let jar = identity.persist(jar, state.config.token_ttl_hours);

    let request = BallotRequest {
        candidate_number: form.candidate_number,
        referrer: header_string(&headers, REFERER),
        locale: header_string(&headers, ACCEPT_LANGUAGE),
        geo_lat: form.latitude,
        geo_lon: form.longitude,
    };

    match state.admission.admit(&identity, request).await {
        Ok(_) => Ok((jar, Redirect::to("/result"))),
        Err(AdmissionError::DuplicateBallot) => Ok((jar, Redirect::to(DUPLICATE_REDIRECT))),
        Err(e) => Err(e.into()),
    }
}

pub async fn result_handler(
    AxumState(state): AxumState<Arc<State>>,
    Query(query): Query<ResultQuery>,
) -> Html<String> {
    let counts = state.tally.snapshot_for_read();
    let count = |candidate: &i64| counts.get(candidate).copied().unwrap_or(0);

    let mut html = String::from(
        "<html>\n<head><title>Results</title></head>\n<body>\n<h1>Results</h1>\n",
    );

    if let Some(message) = query.message.filter(|m| !m.is_empty()) {
        let _ = writeln!(html, "<p><strong>{}</strong></p>", escape_html(&message));
    }

    let _ = writeln!(html, "<p>Blank votes: {}</p>", count(&BLANK_CANDIDATE));
    for candidate in &state.config.candidates {
        let _ = writeln!(html, "<p>Votes for {candidate}: {}</p>", count(candidate));
    }

    html.push_str("</body>\n</html>\n");

    Html(html)
}

pub async fn result_json_handler(AxumState(state): AxumState<Arc<State>>) -> Json<ResultResponse> {
    let tallies: BTreeMap<i64, u64> = state.tally.snapshot_for_read().into_iter().collect();

    Json(ResultResponse {
        blank: tallies.get(&BLANK_CANDIDATE).copied().unwrap_or(0),
        total: tallies.values().sum(),
        tallies,
    })
}
